use std::fmt;
use std::sync::{Arc, Mutex};

use coffer_protocol::{encode_payload, validate, Envelope, MessageType, ProtocolError};
use coffer_types::{Handle, Value};
use coffer_worker::{spawn_worker, Dispatcher, EngineLoader, WorkerHandle};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::resolver::{self, Resolver};

struct Inner {
    config: BridgeConfig,
    resolver: Arc<Resolver>,
    worker: Mutex<Option<WorkerHandle>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Client end of one worker.
///
/// Cheap to clone; every proxy holds one. Independent bridges share nothing
/// and can run side by side.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("worker", &self.inner.config.worker_name)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Bridge {
    /// Spawn a worker running `loader`'s engine and start routing its
    /// replies. Must be called from within a Tokio runtime.
    pub fn start(config: BridgeConfig, loader: impl EngineLoader + 'static) -> BridgeResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| BridgeError::Spawn(e.to_string()))?;
        let dispatcher = Dispatcher::new(loader, config.kv_store()).with_log_level(config.log_level.clone());
        let (worker, mut replies) =
            spawn_worker(&config.worker_name, dispatcher).map_err(|e| BridgeError::Spawn(e.to_string()))?;

        let resolver = Arc::new(Resolver::new(config.correlation));
        let pump_resolver = Arc::clone(&resolver);
        let pump = runtime.spawn(async move {
            while let Some(reply) = replies.recv().await {
                pump_resolver.settle(reply);
            }
            pump_resolver.abandon_all();
        });

        info!(worker = %config.worker_name, correlation = ?config.correlation, "bridge started");
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                resolver,
                worker: Mutex::new(Some(worker)),
                pump: Mutex::new(Some(pump)),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn pending_count(&self) -> usize {
        self.inner.resolver.pending_count()
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.resolver.is_closed()
    }

    /// Validate, send and await one call.
    ///
    /// Malformed calls fail here without reaching the worker or taking a
    /// correlation entry.
    pub async fn call(&self, message: MessageType, object: Option<Handle>, params: Value) -> BridgeResult<Value> {
        validate(message, &params)?;
        if message.scope().has_object() && object.is_none() {
            return Err(ProtocolError::MissingObject(message).into());
        }
        let params = encode_payload(message, params);

        let (id, rx) = self.inner.resolver.register(message)?;
        let env = Envelope::request(id, message, object, params);
        let sent = match self.inner.worker.lock().expect("lock poisoned").as_ref() {
            Some(worker) => worker.send(env).is_ok(),
            None => false,
        };
        if !sent {
            self.inner.resolver.cancel(id, message);
            return Err(BridgeError::Terminated);
        }
        debug!(%id, %message, ?object, "call sent");
        resolver::wait(rx).await
    }

    /// Stop the worker. Pending calls fail with [`BridgeError::Terminated`].
    /// The worker finishes the envelope in progress, then drops every open
    /// object and discards caches without flushing. Returns once it has.
    pub async fn exit(&self) -> usize {
        let worker = self.inner.worker.lock().expect("lock poisoned").take();
        let abandoned = self.inner.resolver.abandon_all();
        if let Some(worker) = worker {
            let name = worker.name().to_string();
            if tokio::task::spawn_blocking(move || worker.shutdown()).await.is_err() {
                debug!(worker = %name, "worker join task failed");
            }
            info!(worker = %name, abandoned, "bridge exited");
        }
        let pump = self.inner.pump.lock().expect("lock poisoned").take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
        abandoned
    }
}
