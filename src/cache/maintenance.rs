use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::RecvTimeoutError;

use super::entry::CacheResource;
use super::lru::LruCache;
use crate::errors::Result;

/// Background sweep thread for an [`LruCache`].
///
/// The thread holds only a weak reference to the cache. Dropping the task
/// disconnects the shutdown channel and joins the thread.
pub(crate) struct MaintenanceTask {
    shutdown: Option<flume::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceTask {
    pub(crate) fn spawn<K, V>(cache: &Arc<LruCache<K, V>>, interval: Duration) -> Result<Self>
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: CacheResource,
    {
        let (shutdown_tx, shutdown_rx) = flume::bounded::<()>(1);
        let weak: Weak<LruCache<K, V>> = Arc::downgrade(cache);

        let handle = std::thread::Builder::new()
            .name("pipeline-cache-sweep".to_string())
            .spawn(move || {
                loop {
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let Some(cache) = weak.upgrade() else { break };
                            let expired = cache.sweep();
                            if expired > 0 {
                                log::debug!("Maintenance sweep expired {expired} entries");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::trace!("Pipeline cache sweep thread stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for MaintenanceTask {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            // The last cache reference can be released by the sweep thread
            // itself; it exits on its own once the channel is gone.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                log::warn!("Pipeline cache sweep thread panicked");
            }
        }
    }
}
