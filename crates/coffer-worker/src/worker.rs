use std::io;
use std::thread::JoinHandle;

use coffer_protocol::Envelope;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;

/// Sending half of a running worker.
///
/// Dropping the handle (or calling [`shutdown`](Self::shutdown)) closes the
/// request channel. The worker finishes the envelope it is on, tears down
/// every open object without flushing caches, and exits.
pub struct WorkerHandle {
    name: String,
    requests: Option<mpsc::UnboundedSender<Envelope>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a request. Gives the envelope back if the worker is gone.
    pub fn send(&self, env: Envelope) -> Result<(), Envelope> {
        match &self.requests {
            Some(tx) => tx.send(env).map_err(|e| e.0),
            None => Err(env),
        }
    }

    pub fn is_running(&self) -> bool {
        self.requests.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Close the request channel without waiting for the thread.
    pub fn close(&mut self) {
        if self.requests.take().is_some() {
            debug!(worker = %self.name, "request channel closed");
        }
    }

    /// Close the request channel and wait for the worker thread to exit.
    pub fn shutdown(mut self) {
        self.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(worker = %self.name, "worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Start `dispatcher` on a dedicated, named OS thread with its own
/// single-threaded runtime. Returns the request handle and the stream of
/// replies, which arrive in request order.
pub fn spawn_worker(
    name: &str,
    mut dispatcher: Dispatcher,
) -> io::Result<(WorkerHandle, mpsc::UnboundedReceiver<Envelope>)> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (req_tx, mut req_rx) = mpsc::unbounded_channel::<Envelope>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Envelope>();

    let worker = name.to_string();
    let thread = std::thread::Builder::new()
        .name(worker.clone())
        .spawn(move || {
            runtime.block_on(async move {
                info!(%worker, "worker started");
                while let Some(env) = req_rx.recv().await {
                    let reply = dispatcher.dispatch(env).await;
                    if reply_tx.send(reply).is_err() {
                        debug!(%worker, "reply channel closed");
                        break;
                    }
                }
                dispatcher.teardown();
                info!(%worker, "worker stopped");
            });
        })?;

    Ok((
        WorkerHandle {
            name: name.to_string(),
            requests: Some(req_tx),
            thread: Some(thread),
        },
        reply_rx,
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use coffer_cache::InMemoryKvStore;
    use coffer_engine::InMemoryEngine;
    use coffer_protocol::{ErrorKind, RequestId, RootMsg};
    use coffer_types::Value;

    use super::*;
    use crate::dispatcher::mem_loader;

    fn start() -> (WorkerHandle, mpsc::UnboundedReceiver<Envelope>) {
        let dispatcher = Dispatcher::new(
            mem_loader(InMemoryEngine::new()),
            Arc::new(InMemoryKvStore::new()),
        );
        spawn_worker("coffer-test-worker", dispatcher).unwrap()
    }

    fn request(id: u64, msg: RootMsg) -> Envelope {
        Envelope::request(RequestId(id), msg.into(), None, Value::Undefined)
    }

    #[tokio::test]
    async fn replies_in_order() {
        let (worker, mut replies) = start();
        assert!(worker.is_running());
        worker.send(request(1, RootMsg::Version)).unwrap();
        worker.send(request(2, RootMsg::InitEnv)).unwrap();
        worker.send(request(3, RootMsg::Version)).unwrap();

        let first = replies.recv().await.unwrap();
        assert_eq!(first.id, RequestId(1));
        assert_eq!(first.error.unwrap().kind, ErrorKind::NotInitialized);
        assert_eq!(replies.recv().await.unwrap().id, RequestId(2));
        let third = replies.recv().await.unwrap();
        assert_eq!(third.id, RequestId(3));
        assert!(third.result.unwrap().as_str().is_some());

        worker.shutdown();
        assert!(replies.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_returns_envelope() {
        let (mut worker, _replies) = start();
        assert_eq!(worker.name(), "coffer-test-worker");
        worker.close();
        assert!(!worker.is_running());
        let back = worker.send(request(9, RootMsg::Version)).unwrap_err();
        assert_eq!(back.id, RequestId(9));
    }
}
