//! Message protocol between Coffer callers and the worker.
//!
//! Declares every message of every scope together with its argument shapes,
//! validates call parameters against those shapes before anything is sent,
//! and defines the [`Envelope`] that carries a call and its reply.

pub mod envelope;
pub mod error;
pub mod message;
pub mod payload;
pub mod table;
pub mod validate;

pub use envelope::{Envelope, ErrorKind, RequestId, WireError};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{FileMsg, MessageType, RepoMsg, RootMsg, Scope, VersionReaderMsg};
pub use payload::encode_payload;
pub use table::{ArgShape, KeySpec, MessageSpec, PROTOCOL_VERSION};
pub use validate::validate;
