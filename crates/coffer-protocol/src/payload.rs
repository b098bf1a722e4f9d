use coffer_types::{ByteView, Value};

use crate::message::MessageType;

/// Re-encode the argument of a byte-carrying message for transfer.
///
/// String payloads become their UTF-8 bytes. Byte views pass through
/// untouched, keeping their offset and length, so the buffer is moved to the
/// worker as is. Other messages and other kinds are returned unchanged.
pub fn encode_payload(message: MessageType, params: Value) -> Value {
    if !message.carries_payload() {
        return params;
    }
    match params {
        Value::String(s) => Value::Buffer(ByteView::new(s.into_bytes())),
        other => other,
    }
}
