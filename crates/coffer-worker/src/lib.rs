//! Worker side of the Coffer bridge.
//!
//! The worker owns the storage engine and every live native object. It runs
//! on its own thread, takes [`Envelope`](coffer_protocol::Envelope)s off a
//! channel one at a time, routes each to the object named by its handle and
//! sends back the reply.
//!
//! # Key Types
//!
//! - [`Dispatcher`]: routes one envelope to the engine and builds its reply
//! - [`HandleTable`]: generational handle to live repo, file and reader
//! - [`WorkerHandle`]: sending half of a worker started by [`spawn_worker`]

pub mod arena;
pub mod dispatcher;
pub mod error;
pub mod handles;
pub mod logging;
pub mod worker;

pub use arena::Arena;
pub use dispatcher::{mem_loader, Dispatcher, EngineLoader};
pub use error::{DispatchError, DispatchResult};
pub use handles::HandleTable;
pub use worker::{spawn_worker, WorkerHandle};
