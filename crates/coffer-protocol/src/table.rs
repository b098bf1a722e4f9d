//! Argument shapes of every message in the protocol.
//!
//! Pure data: the per-scope enums in [`crate::message`] point at the constants
//! declared here, and [`crate::validate`] checks call parameters against them.

use coffer_types::ValueKind;

pub const PROTOCOL_VERSION: u32 = 1;

/// One key of an object-shaped argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeySpec {
    pub name: &'static str,
    pub kind: ValueKind,
    pub optional: bool,
}

/// One accepted shape of a message's single argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgShape {
    /// A primitive of the given kind.
    Kind(ValueKind),
    /// An object with the given keys.
    Object(&'static [KeySpec]),
}

impl ArgShape {
    pub const fn kind(&self) -> ValueKind {
        match self {
            Self::Kind(kind) => *kind,
            Self::Object(_) => ValueKind::Object,
        }
    }
}

/// Protocol table entry for one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageSpec {
    pub name: &'static str,
    /// Accepted argument shapes; empty when the message takes no argument.
    pub args: &'static [ArgShape],
    /// Whether the argument may be omitted entirely.
    pub optional: bool,
}

impl MessageSpec {
    pub fn takes_args(&self) -> bool {
        !self.args.is_empty()
    }
}

// Shared argument shapes.

macro_rules! key {
    ($name:literal : $kind:ident) => {
        KeySpec { name: $name, kind: ValueKind::$kind, optional: false }
    };
    ($name:literal ? : $kind:ident) => {
        KeySpec { name: $name, kind: ValueKind::$kind, optional: true }
    };
}

pub const NO_ARGS: &[ArgShape] = &[];
pub const STRING: &[ArgShape] = &[ArgShape::Kind(ValueKind::String)];
pub const NUMBER: &[ArgShape] = &[ArgShape::Kind(ValueKind::Number)];
pub const BUFFER: &[ArgShape] = &[ArgShape::Kind(ValueKind::Buffer)];
pub const STRING_OR_BUFFER: &[ArgShape] = &[
    ArgShape::Kind(ValueKind::String),
    ArgShape::Kind(ValueKind::Buffer),
];

pub const INIT_ENV: &[ArgShape] = &[ArgShape::Object(&[key!("logLevel"?: String)])];

pub const OPEN_REPO: &[ArgShape] = &[ArgShape::Object(&[
    key!("uri": String),
    key!("pwd": String),
    key!("opts"?: Object),
])];

pub const URI_AND_PWD: &[ArgShape] = &[ArgShape::Object(&[
    key!("uri": String),
    key!("pwd": String),
])];

pub const RESET_PASSWORD: &[ArgShape] = &[ArgShape::Object(&[
    key!("oldPwd": String),
    key!("newPwd": String),
])];

pub const OPEN_FILE: &[ArgShape] = &[
    ArgShape::Kind(ValueKind::String),
    ArgShape::Object(&[
        key!("path": String),
        key!("opts"?: Object),
    ]),
];

pub const FROM_TO: &[ArgShape] = &[ArgShape::Object(&[
    key!("from": String),
    key!("to": String),
])];

pub const SEEK: &[ArgShape] = &[ArgShape::Object(&[
    key!("from": Number),
    key!("offset": Number),
])];
