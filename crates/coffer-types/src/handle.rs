use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier for one live native instance owned by the worker.
///
/// The low 32 bits index a slot in the worker's handle table and the high
/// 32 bits carry that slot's generation. A slot's generation is bumped every
/// time it is freed, so a handle kept past its `close` never resolves to the
/// instance that later reuses the slot.
///
/// Callers treat a `Handle` as an opaque integer and never build one by hand.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(u64);

impl Handle {
    /// Pack a slot index and generation into a handle.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    /// Rebuild a handle from its raw integer form.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw integer form carried in envelopes.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Slot index in the owning table.
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// Generation of the slot at the time the handle was issued.
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}#{})", self.index(), self.generation())
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index(), self.generation())
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn packs_index_and_generation() {
        let h = Handle::new(7, 3);
        assert_eq!(h.index(), 7);
        assert_eq!(h.generation(), 3);
        assert_eq!(h.as_u64(), (3u64 << 32) | 7);
    }

    #[test]
    fn same_slot_different_generation_differs() {
        assert_ne!(Handle::new(1, 0), Handle::new(1, 1));
    }

    #[test]
    fn display_format() {
        assert_eq!(Handle::new(4, 2).to_string(), "4#2");
        assert_eq!(format!("{:?}", Handle::new(4, 2)), "Handle(4#2)");
    }

    #[test]
    fn serializes_as_plain_integer() {
        let json = serde_json::to_string(&Handle::new(1, 1)).unwrap();
        assert_eq!(json, ((1u64 << 32) | 1).to_string());
    }

    proptest! {
        #[test]
        fn raw_form_is_lossless(index in any::<u32>(), generation in any::<u32>()) {
            let h = Handle::new(index, generation);
            let back = Handle::from_raw(h.as_u64());
            prop_assert_eq!(back.index(), index);
            prop_assert_eq!(back.generation(), generation);
        }
    }
}
