//! A pool of plugin instances per key.
//!
//! Each key has a factory and a cap on live instances. [`InstancePool::get`]
//! waits (up to a timeout) for a free slot, reuses an idle instance or
//! builds a new one, and hands it out behind a [`PooledInstance`] guard that
//! returns it on drop. Poisoned instances are discarded instead of reused.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{PoolError, RuntimeResult};
use crate::instance::PluginInstance;

/// Default wait for a free instance.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

type Factory = Arc<dyn Fn() -> RuntimeResult<PluginInstance> + Send + Sync>;

struct PoolEntry {
    factory: Factory,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<PluginInstance>>,
    live: AtomicUsize,
}

impl PoolEntry {
    fn take_idle(&self) -> Option<PluginInstance> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    fn give_back(&self, instance: PluginInstance) {
        if instance.is_poisoned() {
            warn!(plugin = %instance.id(), "Discarding poisoned instance");
            self.live.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        match self.idle.lock() {
            Ok(mut idle) => idle.push(instance),
            Err(_) => {
                self.live.fetch_sub(1, Ordering::AcqRel);
            },
        }
    }
}

/// Instances grouped by key with a per-key concurrency cap.
pub struct InstancePool {
    max_instances: usize,
    default_timeout: Duration,
    entries: RwLock<HashMap<String, Arc<PoolEntry>>>,
}

impl std::fmt::Debug for InstancePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys = self.entries.read().map(|e| e.len()).unwrap_or_default();
        f.debug_struct("InstancePool")
            .field("max_instances", &self.max_instances)
            .field("default_timeout", &self.default_timeout)
            .field("keys", &keys)
            .finish()
    }
}

impl InstancePool {
    /// Create a pool allowing `max_instances` live instances per key.
    #[must_use]
    pub fn new(max_instances: usize) -> Self {
        Self {
            max_instances: max_instances.max(1),
            default_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Set the timeout used by [`acquire`](Self::acquire).
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Per-key instance cap.
    #[must_use]
    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    /// Register `factory` under `key`, replacing any previous one.
    pub fn add<F>(&self, key: impl Into<String>, factory: F)
    where
        F: Fn() -> RuntimeResult<PluginInstance> + Send + Sync + 'static,
    {
        let key = key.into();
        let entry = Arc::new(PoolEntry {
            factory: Arc::new(factory),
            permits: Arc::new(Semaphore::new(self.max_instances)),
            idle: Mutex::new(Vec::new()),
            live: AtomicUsize::new(0),
        });
        if let Ok(mut entries) = self.entries.write() {
            debug!(key = %key, max = self.max_instances, "Registered pool key");
            entries.insert(key, entry);
        }
    }

    /// Live instances (idle or checked out) for `key`.
    #[must_use]
    pub fn count(&self, key: &str) -> usize {
        self.entry(key)
            .map(|e| e.live.load(Ordering::Acquire))
            .unwrap_or_default()
    }

    /// Get an instance for `key`, waiting at most the default timeout.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn acquire(&self, key: &str) -> Result<PooledInstance, PoolError> {
        self.get(key, self.default_timeout).await
    }

    /// Get an instance for `key`, waiting at most `timeout` for a free slot.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownKey`] for unregistered keys,
    /// [`PoolError::Timeout`] when no slot frees up in time,
    /// [`PoolError::Closed`] after [`close`](Self::close) and
    /// [`PoolError::Build`] when the factory fails.
    pub async fn get(&self, key: &str, timeout: Duration) -> Result<PooledInstance, PoolError> {
        let entry = self.entry(key).ok_or_else(|| PoolError::UnknownKey {
            key: key.to_string(),
        })?;

        let permit = match tokio::time::timeout(timeout, Arc::clone(&entry.permits).acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => {
                return Err(PoolError::Timeout {
                    key: key.to_string(),
                    timeout_ms: timeout.as_millis(),
                });
            },
        };

        let instance = match entry.take_idle() {
            Some(instance) => instance,
            None => {
                let instance = (entry.factory)().map_err(|source| PoolError::Build {
                    key: key.to_string(),
                    source,
                })?;
                entry.live.fetch_add(1, Ordering::AcqRel);
                debug!(key, plugin = %instance.id(), "Pool created instance");
                instance
            },
        };

        Ok(PooledInstance {
            instance: Some(instance),
            entry,
            _permit: permit,
        })
    }

    /// Stop handing out instances; pending and future `get`s fail with
    /// [`PoolError::Closed`].
    pub fn close(&self) {
        if let Ok(entries) = self.entries.read() {
            for entry in entries.values() {
                entry.permits.close();
            }
        }
    }

    fn entry(&self, key: &str) -> Option<Arc<PoolEntry>> {
        self.entries.read().ok()?.get(key).cloned()
    }
}

/// A checked-out instance; returns to its pool on drop.
pub struct PooledInstance {
    instance: Option<PluginInstance>,
    entry: Arc<PoolEntry>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledInstance")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl Deref for PooledInstance {
    type Target = PluginInstance;

    fn deref(&self) -> &PluginInstance {
        match &self.instance {
            Some(instance) => instance,
            None => unreachable!("instance is only taken on drop"),
        }
    }
}

impl DerefMut for PooledInstance {
    fn deref_mut(&mut self) -> &mut PluginInstance {
        match &mut self.instance {
            Some(instance) => instance,
            None => unreachable!("instance is only taken on drop"),
        }
    }
}

impl Drop for PooledInstance {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.entry.give_back(instance);
        }
    }
}
