//! Dynamic values carried in envelope `params` and `result` fields.
//!
//! [`Value`] is a small JSON-like model with one extra variant,
//! [`Value::Buffer`], which carries a [`ByteView`]: an owned byte buffer plus
//! the offset and length of the window the caller cares about. Moving a
//! `ByteView` through a channel moves the buffer, so payloads cross the
//! bridge without being copied.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::TypeError;
use crate::handle::Handle;

// ---------------------------------------------------------------------------
// ByteView
// ---------------------------------------------------------------------------

/// An owned buffer with a window `[offset, offset + len)` into it.
#[derive(Clone, Default)]
pub struct ByteView {
    buf: Vec<u8>,
    offset: usize,
    len: usize,
}

impl ByteView {
    /// A view covering the whole buffer.
    pub fn new(buf: Vec<u8>) -> Self {
        let len = buf.len();
        Self { buf, offset: 0, len }
    }

    /// A view over `buf[offset..offset + len]`.
    pub fn with_range(buf: Vec<u8>, offset: usize, len: usize) -> Result<Self, TypeError> {
        match offset.checked_add(len) {
            Some(end) if end <= buf.len() => Ok(Self { buf, offset, len }),
            _ => Err(TypeError::OutOfBounds {
                offset,
                len,
                capacity: buf.len(),
            }),
        }
    }

    /// A zero-filled buffer of `len` bytes, viewed whole.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// Start of the window within the underlying buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the window.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the whole underlying buffer.
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf[self.offset..self.offset + self.len]
    }

    /// Shrink the window to its first `len` bytes. The offset is kept.
    pub fn narrow(mut self, len: usize) -> Self {
        self.len = self.len.min(len);
        self
    }

    /// Give back the whole underlying buffer, ignoring the window.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buf
    }

    /// The viewed bytes as a vector. Does not copy when the view covers the
    /// whole buffer.
    pub fn into_vec(self) -> Vec<u8> {
        if self.offset == 0 && self.len == self.buf.len() {
            self.buf
        } else {
            self.as_slice().to_vec()
        }
    }
}

impl Deref for ByteView {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl PartialEq for ByteView {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for ByteView {}

impl PartialEq<[u8]> for ByteView {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_slice() == other
    }
}

impl PartialEq<Vec<u8>> for ByteView {
    fn eq(&self, other: &Vec<u8>) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<const N: usize> PartialEq<[u8; N]> for ByteView {
    fn eq(&self, other: &[u8; N]) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("bytes", &self.as_slice())
            .finish()
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(buf: Vec<u8>) -> Self {
        Self::new(buf)
    }
}

impl From<&[u8]> for ByteView {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for ByteView {
    fn from(bytes: [u8; N]) -> Self {
        Self::new(bytes.to_vec())
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Runtime kind of a [`Value`], as seen by argument validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    String,
    Number,
    Buffer,
    Object,
    Boolean,
    Undefined,
    Other,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Buffer => "buffer",
            Self::Object => "object",
            Self::Boolean => "boolean",
            Self::Undefined => "undefined",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dynamically shaped envelope payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// No argument at all.
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(i64),
    String(String),
    Buffer(ByteView),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Build an object from key/value pairs.
    pub fn object<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Undefined => ValueKind::Undefined,
            Self::String(_) => ValueKind::String,
            Self::Number(_) => ValueKind::Number,
            Self::Buffer(_) => ValueKind::Buffer,
            Self::Object(_) => ValueKind::Object,
            Self::Bool(_) => ValueKind::Boolean,
            Self::Null | Self::Array(_) => ValueKind::Other,
        }
    }

    /// `true` for `Undefined` and `Null`.
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Look up a present (non-null) key of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(map) => map.get(key).filter(|v| !v.is_absent()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_buffer(self) -> Option<ByteView> {
        match self {
            Self::Buffer(view) => Some(view),
            _ => None,
        }
    }

    /// The value as a handle. Handles travel as numbers holding their raw
    /// bits.
    pub fn as_handle(&self) -> Option<Handle> {
        self.as_i64().map(|n| Handle::from_raw(n as u64))
    }

    /// The value as a string, or a kind error.
    pub fn require_str(&self) -> Result<&str, TypeError> {
        self.as_str().ok_or(TypeError::UnexpectedKind {
            expected: "string",
            actual: self.kind().as_str(),
        })
    }

    /// The value as a non-negative integer, or a kind error.
    pub fn require_u64(&self) -> Result<u64, TypeError> {
        match self {
            Self::Number(n) if *n >= 0 => Ok(*n as u64),
            _ => Err(TypeError::UnexpectedKind {
                expected: "non-negative number",
                actual: self.kind().as_str(),
            }),
        }
    }

    /// The value as an integer, or a kind error.
    pub fn require_i64(&self) -> Result<i64, TypeError> {
        self.as_i64().ok_or(TypeError::UnexpectedKind {
            expected: "number",
            actual: self.kind().as_str(),
        })
    }

    /// A required string field of an object value.
    pub fn field_str(&self, key: &str) -> Result<&str, TypeError> {
        self.get(key)
            .ok_or_else(|| TypeError::MissingField(key.to_string()))?
            .require_str()
    }

    /// A required integer field of an object value.
    pub fn field_i64(&self, key: &str) -> Result<i64, TypeError> {
        self.get(key)
            .ok_or_else(|| TypeError::MissingField(key.to_string()))?
            .require_i64()
    }

    /// Convert any serializable structure into a value.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, TypeError> {
        serde_json::to_value(value)
            .map(Self::from)
            .map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// Decode this value into a deserializable structure.
    pub fn deserialize_into<T: DeserializeOwned>(self) -> Result<T, TypeError> {
        serde_json::from_value(self.to_json()).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    /// JSON rendering. Buffers become arrays of byte values.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Self::Undefined | Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Number(n) => Json::from(*n),
            Self::String(s) => Json::String(s.clone()),
            Self::Buffer(view) => Json::Array(view.iter().map(|b| Json::from(*b)).collect()),
            Self::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Self::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Number(i),
                None => Self::Number(n.as_u64().map_or(0, |u| i64::try_from(u).unwrap_or(i64::MAX))),
            },
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Number(i64::from(n))
    }
}

impl TryFrom<u64> for Value {
    type Error = TypeError;

    fn try_from(n: u64) -> Result<Self, TypeError> {
        i64::try_from(n)
            .map(Self::Number)
            .map_err(|_| TypeError::OutOfRange(n))
    }
}

impl TryFrom<usize> for Value {
    type Error = TypeError;

    fn try_from(n: usize) -> Result<Self, TypeError> {
        Self::try_from(n as u64)
    }
}

impl From<Handle> for Value {
    fn from(handle: Handle) -> Self {
        Self::Number(handle.as_u64() as i64)
    }
}

impl From<Vec<u8>> for Value {
    fn from(buf: Vec<u8>) -> Self {
        Self::Buffer(ByteView::new(buf))
    }
}

impl From<ByteView> for Value {
    fn from(view: ByteView) -> Self {
        Self::Buffer(view)
    }
}
