use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use coffer_protocol::{Envelope, MessageType, RequestId};
use coffer_types::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::Correlation;
use crate::error::{BridgeError, BridgeResult};

/// What an awaiting caller eventually receives.
pub type Reply = BridgeResult<Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Key {
    Request(RequestId),
    Slot(MessageType),
}

struct Pending {
    id: RequestId,
    tx: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct State {
    entries: HashMap<Key, Pending>,
    closed: bool,
}

/// Correlation table matching worker replies to outstanding calls.
///
/// Every call gets a fresh request id. In [`Correlation::PerRequest`] mode
/// entries are keyed by that id, so any number of calls can overlap. In
/// [`Correlation::PerMessageType`] mode there is one slot per message: a
/// second outstanding call of the same message takes the slot, the first
/// caller fails with [`BridgeError::Superseded`], and the first reply to
/// arrive settles the second caller.
pub struct Resolver {
    mode: Correlation,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl Resolver {
    pub fn new(mode: Correlation) -> Self {
        Self {
            mode,
            next_id: AtomicU64::new(1),
            state: Mutex::default(),
        }
    }

    pub fn mode(&self) -> Correlation {
        self.mode
    }

    fn key(&self, id: RequestId, message: MessageType) -> Key {
        match self.mode {
            Correlation::PerRequest => Key::Request(id),
            Correlation::PerMessageType => Key::Slot(message),
        }
    }

    /// Record an outstanding call. Fails with [`BridgeError::Terminated`]
    /// once the table has been abandoned.
    pub fn register(&self, message: MessageType) -> BridgeResult<(RequestId, oneshot::Receiver<Reply>)> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().expect("lock poisoned");
        if state.closed {
            return Err(BridgeError::Terminated);
        }
        if let Some(old) = state.entries.insert(self.key(id, message), Pending { id, tx }) {
            warn!(%message, superseded = %old.id, by = %id, "correlation slot overwritten");
            let _ = old.tx.send(Err(BridgeError::Superseded(message)));
        }
        Ok((id, rx))
    }

    /// Deliver a reply to its caller. Returns `false` when no entry matched.
    pub fn settle(&self, reply: Envelope) -> bool {
        let key = self.key(reply.id, reply.message);
        let pending = self.state.lock().expect("lock poisoned").entries.remove(&key);
        let Some(pending) = pending else {
            debug!(id = %reply.id, message = %reply.message, "reply without pending call dropped");
            return false;
        };
        let id = reply.id;
        let outcome = reply.into_outcome().map_err(BridgeError::from);
        if pending.tx.send(outcome).is_err() {
            debug!(%id, "caller gone before reply");
        }
        true
    }

    /// Forget one call. Its reply, if any arrives, is dropped.
    pub fn cancel(&self, id: RequestId, message: MessageType) -> bool {
        let key = self.key(id, message);
        let mut state = self.state.lock().expect("lock poisoned");
        match state.entries.get(&key) {
            Some(p) if p.id == id => state.entries.remove(&key).is_some(),
            _ => false,
        }
    }

    /// Drop every pending entry and refuse new ones. Awaiting callers see
    /// their sender vanish. Returns the number of calls abandoned.
    pub fn abandon_all(&self) -> usize {
        let mut state = self.state.lock().expect("lock poisoned");
        state.closed = true;
        let count = state.entries.len();
        state.entries.clear();
        if count > 0 {
            debug!(count, "pending calls abandoned");
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").entries.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("lock poisoned").closed
    }
}

/// Await a registered call, mapping a vanished sender to
/// [`BridgeError::Terminated`].
pub async fn wait(rx: oneshot::Receiver<Reply>) -> Reply {
    rx.await.unwrap_or(Err(BridgeError::Terminated))
}

#[cfg(test)]
mod tests {
    use coffer_protocol::{ErrorKind, FileMsg, RootMsg, WireError};

    use super::*;

    fn reply(id: RequestId, message: MessageType, value: Value) -> Envelope {
        Envelope::request(id, message, None, Value::Undefined).reply_ok(value)
    }

    // ---- Per-request ----

    #[tokio::test]
    async fn ids_are_monotonic() {
        let r = Resolver::new(Correlation::PerRequest);
        let (a, _ra) = r.register(RootMsg::Version.into()).unwrap();
        let (b, _rb) = r.register(RootMsg::Version.into()).unwrap();
        assert!(b > a);
        assert_eq!(r.pending_count(), 2);
    }

    #[tokio::test]
    async fn overlapping_calls_settle_independently() {
        let r = Resolver::new(Correlation::PerRequest);
        let msg: MessageType = FileMsg::ReadAll.into();
        let (a, ra) = r.register(msg).unwrap();
        let (b, rb) = r.register(msg).unwrap();

        assert!(r.settle(reply(b, msg, Value::from("second"))));
        assert!(r.settle(reply(a, msg, Value::from("first"))));
        assert_eq!(wait(ra).await.unwrap(), Value::from("first"));
        assert_eq!(wait(rb).await.unwrap(), Value::from("second"));
        assert_eq!(r.pending_count(), 0);
    }

    #[tokio::test]
    async fn error_replies_become_bridge_errors() {
        let r = Resolver::new(Correlation::PerRequest);
        let msg: MessageType = FileMsg::ReadAll.into();
        let (id, rx) = r.register(msg).unwrap();
        let env = Envelope::request(id, msg, None, Value::Undefined)
            .reply_err(WireError::new(ErrorKind::HandleNotFound, "gone"));
        r.settle(env);
        assert_eq!(wait(rx).await, Err(BridgeError::HandleNotFound("gone".into())));
    }

    #[tokio::test]
    async fn unmatched_and_cancelled_replies_dropped() {
        let r = Resolver::new(Correlation::PerRequest);
        let msg: MessageType = RootMsg::Version.into();
        assert!(!r.settle(reply(RequestId(99), msg, Value::Undefined)));

        let (id, _rx) = r.register(msg).unwrap();
        assert!(r.cancel(id, msg));
        assert!(!r.cancel(id, msg));
        assert!(!r.settle(reply(id, msg, Value::Undefined)));
    }

    #[tokio::test]
    async fn abandon_fails_waiters_with_terminated() {
        let r = Resolver::new(Correlation::PerRequest);
        let (_, rx) = r.register(RootMsg::Version.into()).unwrap();
        assert_eq!(r.abandon_all(), 1);
        assert_eq!(wait(rx).await, Err(BridgeError::Terminated));
        assert!(r.is_closed());
        assert!(matches!(r.register(RootMsg::Version.into()), Err(BridgeError::Terminated)));
    }

    // ---- Per-message-type ----

    #[tokio::test]
    async fn single_slot_overwrite() {
        let r = Resolver::new(Correlation::PerMessageType);
        let msg: MessageType = FileMsg::ReadAll.into();
        let (a, first) = r.register(msg).unwrap();
        let (b, second) = r.register(msg).unwrap();
        assert_eq!(r.pending_count(), 1);

        assert_eq!(wait(first).await, Err(BridgeError::Superseded(msg)));
        // The first reply lands in the slot now owned by the second caller.
        assert!(r.settle(reply(a, msg, Value::from("first"))));
        assert!(!r.settle(reply(b, msg, Value::from("second"))));
        assert_eq!(wait(second).await.unwrap(), Value::from("first"));
    }

    #[tokio::test]
    async fn different_messages_use_different_slots() {
        let r = Resolver::new(Correlation::PerMessageType);
        let (a, ra) = r.register(FileMsg::ReadAll.into()).unwrap();
        let (b, rb) = r.register(FileMsg::Metadata.into()).unwrap();
        r.settle(reply(b, FileMsg::Metadata.into(), Value::from(2i64)));
        r.settle(reply(a, FileMsg::ReadAll.into(), Value::from(1i64)));
        assert_eq!(wait(ra).await.unwrap(), Value::from(1i64));
        assert_eq!(wait(rb).await.unwrap(), Value::from(2i64));
    }

    #[tokio::test]
    async fn cancel_leaves_newer_slot_owner() {
        let r = Resolver::new(Correlation::PerMessageType);
        let msg: MessageType = RootMsg::Version.into();
        let (a, _ra) = r.register(msg).unwrap();
        let (_b, _rb) = r.register(msg).unwrap();
        assert!(!r.cancel(a, msg));
        assert_eq!(r.pending_count(), 1);
    }
}
