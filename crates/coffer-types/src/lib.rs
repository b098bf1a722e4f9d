//! Foundation types for Coffer.
//!
//! Every other Coffer crate depends on `coffer-types`. It defines the values
//! that travel between the calling context and the worker, and the shapes
//! both sides agree on.
//!
//! # Key Types
//!
//! - [`Handle`]: generational opaque identifier of a live native instance
//! - [`Value`] / [`ByteView`]: dynamic envelope payloads with moved byte buffers
//! - [`RepoUri`]: parsed `scheme://accessKey@repoId[?opts]` repository address
//! - [`RepoOptions`] / [`FileOptions`]: open option bags
//! - [`Metadata`], [`DirEntry`], [`Version`], [`RepoInfo`]: engine result shapes

pub mod error;
pub mod handle;
pub mod meta;
pub mod options;
pub mod seek;
pub mod uri;
pub mod value;

pub use error::TypeError;
pub use handle::Handle;
pub use meta::{unix_now, DirEntry, FileType, Metadata, RepoInfo, Version};
pub use options::{FileOptions, RepoOptions};
pub use seek::{decode_seek, encode_seek, SeekOrigin};
pub use uri::{CacheType, RepoUri};
pub use value::{ByteView, Value, ValueKind};

/// Convenience alias for results carrying a [`TypeError`].
pub type TypeResult<T> = Result<T, TypeError>;
