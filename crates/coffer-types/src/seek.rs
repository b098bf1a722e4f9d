use std::io::SeekFrom;

use crate::error::TypeError;
use crate::value::Value;

/// Wire encoding of a seek origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SeekOrigin {
    Start = 0,
    End = 1,
    Current = 2,
}

impl SeekOrigin {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Start),
            1 => Some(Self::End),
            2 => Some(Self::Current),
            _ => None,
        }
    }
}

/// Encode a [`SeekFrom`] as the `{from, offset}` object sent on the wire.
pub fn encode_seek(pos: SeekFrom) -> Value {
    let (from, offset) = match pos {
        SeekFrom::Start(n) => (SeekOrigin::Start, i64::try_from(n).unwrap_or(i64::MAX)),
        SeekFrom::End(n) => (SeekOrigin::End, n),
        SeekFrom::Current(n) => (SeekOrigin::Current, n),
    };
    Value::object([
        ("from", Value::Number(from as i64)),
        ("offset", Value::Number(offset)),
    ])
}

/// Decode a `{from, offset}` object.
pub fn decode_seek(v: &Value) -> Result<SeekFrom, TypeError> {
    let code = v.field_i64("from")?;
    let offset = v.field_i64("offset")?;
    let origin = SeekOrigin::from_code(code).ok_or_else(|| TypeError::InvalidOption {
        key: "from".into(),
        reason: format!("unknown seek origin {code}"),
    })?;
    match origin {
        SeekOrigin::Start => u64::try_from(offset)
            .map(SeekFrom::Start)
            .map_err(|_| TypeError::InvalidOption {
                key: "offset".into(),
                reason: "negative offset from start".into(),
            }),
        SeekOrigin::End => Ok(SeekFrom::End(offset)),
        SeekOrigin::Current => Ok(SeekFrom::Current(offset)),
    }
}
