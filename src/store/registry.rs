//! Registry of live disk-backed stores
//!
//! Stores register on open and deregister when dropped or closed. The
//! registry only holds `Weak` references; it never keeps a store alive.
//!
//! [`StoreRegistry::shutdown`] is the teardown barrier: it drains the
//! registry, then flushes every store that still exists and stops its timer.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::error::Result;

/// A store that can be flushed and stopped by the registry
pub(crate) trait Persistent: Send + Sync {
    /// Stop scheduling, then flush pending writes synchronously
    fn shutdown(&self) -> Result<()>;
}

/// Tracks disk-backed stores for process shutdown
pub struct StoreRegistry {
    stores: Mutex<HashMap<u64, Weak<dyn Persistent>>>,
    next_id: AtomicU64,
}

static GLOBAL: OnceLock<Arc<StoreRegistry>> = OnceLock::new();

impl StoreRegistry {
    /// Create an empty registry, independent of the global one
    pub fn new() -> Self {
        Self {
            stores: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The process-wide registry used by default
    pub fn global() -> Arc<StoreRegistry> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(StoreRegistry::new())))
    }

    pub(crate) fn register(&self, store: Weak<dyn Persistent>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.stores.lock().insert(id, store);
        id
    }

    pub(crate) fn deregister(&self, id: u64) {
        self.stores.lock().remove(&id);
    }

    /// Number of registered stores that are still alive
    pub fn live_count(&self) -> usize {
        self.stores
            .lock()
            .values()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    /// Flush every registered store and clear the registry
    ///
    /// Blocks until all pending and in-flight flushes have completed. Every
    /// store is attempted; the first failure is returned.
    pub fn shutdown(&self) -> Result<()> {
        let stores: Vec<Weak<dyn Persistent>> = {
            let mut stores = self.stores.lock();
            stores.drain().map(|(_, store)| store).collect()
        };

        let mut flushed = 0usize;
        let mut first_error = None;

        for store in stores {
            let Some(store) = store.upgrade() else {
                continue;
            };
            match store.shutdown() {
                Ok(()) => flushed += 1,
                Err(e) => {
                    tracing::error!("Store flush during shutdown failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!("Store registry shut down, {} stores flushed", flushed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("registered", &self.stores.lock().len())
            .finish()
    }
}
