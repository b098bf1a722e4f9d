use coffer_types::{Value, ValueKind};

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::MessageType;
use crate::table::ArgShape;

/// Check `params` against the declared argument shapes of `message`.
///
/// A shape is picked by the runtime kind of `params`. When no declared shape
/// has that kind the call is accepted only if the argument was omitted and
/// the message either declares none or marks it optional. Object schemas
/// additionally require every non-optional key (a null counts as missing)
/// and check the kind of every declared key that is present.
pub fn validate(message: MessageType, params: &Value) -> ProtocolResult<()> {
    let spec = message.spec();
    let kind = params.kind();

    let Some(shape) = spec.args.iter().find(|s| s.kind() == kind) else {
        if kind == ValueKind::Undefined && (spec.optional || !spec.takes_args()) {
            return Ok(());
        }
        let expected = if spec.takes_args() {
            spec.args
                .iter()
                .map(|s| s.kind().as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        } else {
            "no argument".to_string()
        };
        return Err(ProtocolError::invalid(
            message,
            format!("expected {expected}, got {kind}"),
        ));
    };

    if let ArgShape::Object(keys) = shape {
        for key in keys.iter() {
            match params.get(key.name) {
                None if key.optional => {}
                None => {
                    return Err(ProtocolError::invalid(
                        message,
                        format!("missing required key '{}'", key.name),
                    ))
                }
                Some(v) if v.kind() != key.kind => {
                    return Err(ProtocolError::invalid(
                        message,
                        format!("key '{}' must be {}, got {}", key.name, key.kind, v.kind()),
                    ))
                }
                Some(_) => {}
            }
        }
    }

    Ok(())
}
