//! Caller-facing SDK for Coffer.
//!
//! A [`Bridge`] owns one worker thread running a storage engine. Calls are
//! validated on the caller's side, sent to the worker as envelopes and
//! matched back to their awaiting caller by the [`Resolver`]. The proxies
//! ([`Root`], [`Repo`], [`File`], [`VersionReader`]) wrap the bridge with a
//! typed method per protocol message.
//!
//! ```no_run
//! # async fn demo() -> coffer_sdk::BridgeResult<()> {
//! use coffer_sdk::{mem_loader, BridgeConfig, InMemoryEngine, RepoOptions, Root};
//!
//! let root = Root::start(BridgeConfig::default(), mem_loader(InMemoryEngine::new()))?;
//! root.init_env(None).await?;
//! let repo = root.open_repo("mem://key@notes", "pwd", &RepoOptions::new().create(true)).await?;
//! let file = repo.create_file("/hello.txt").await?;
//! file.write_once("hello").await?;
//! repo.close().await?;
//! root.exit().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Key Types
//!
//! - [`Bridge`]: client end of one worker
//! - [`BridgeConfig`]: worker name, correlation mode, cache directory, log level
//! - [`BridgeError`]: every failure a call can end with

pub mod bridge;
pub mod config;
pub mod error;
pub mod proxy;
pub mod resolver;

#[cfg(test)]
mod test_support;

pub use bridge::Bridge;
pub use config::{BridgeConfig, Correlation};
pub use error::{BridgeError, BridgeResult};
pub use proxy::{File, Outcome, Repo, Root, VersionReader};
pub use resolver::Resolver;

pub use coffer_engine::InMemoryEngine;
pub use coffer_protocol::{ErrorKind, MessageType, Scope};
pub use coffer_types::{
    ByteView, DirEntry, FileOptions, FileType, Handle, Metadata, RepoInfo, RepoOptions, Value, Version,
};
pub use coffer_worker::{mem_loader, EngineLoader};
