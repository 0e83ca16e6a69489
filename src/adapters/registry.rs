//! # Adapter Registry
//!
//! Named, lazily-constructed set of resilient adapters with aggregated
//! health/metrics and coordinated shutdown.
//!
//! The registry is an ordinary value: construct one at the application
//! boundary and pass it (usually as `Arc<AdapterRegistry>`) to whoever needs
//! adapters.

use crate::adapters::base::{AdapterService, ManagedAdapter, ResilientAdapter};
use crate::adapters::AdapterConfig;
use crate::error::RegistryError;
use crate::resilience::{SystemAdapterHealth, SystemAdapterMetrics};
use futures::future::join_all;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One registered adapter, held both type-erased (for aggregation) and as
/// `Any` (for typed lookup). Both point at the same allocation.
#[derive(Clone)]
struct RegisteredAdapter {
    managed: Arc<dyn ManagedAdapter>,
    typed: Arc<dyn Any + Send + Sync>,
}

impl RegisteredAdapter {
    fn downcast<S: AdapterService>(
        &self,
        name: &str,
    ) -> Result<Arc<ResilientAdapter<S>>, RegistryError> {
        Arc::clone(&self.typed)
            .downcast::<ResilientAdapter<S>>()
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<S>(),
            })
    }
}

/// Registry of resilient adapters by name
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, RegisteredAdapter>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the adapter registered as `name`, constructing it on first use.
    ///
    /// The first caller's `constructor` and `config` win; later callers get
    /// the existing instance and their arguments are ignored.
    pub async fn get_or_create<S, F>(
        &self,
        name: &str,
        constructor: F,
        config: AdapterConfig,
    ) -> Result<Arc<ResilientAdapter<S>>, RegistryError>
    where
        S: AdapterService,
        F: FnOnce() -> S,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Closed);
        }

        {
            let adapters = self.adapters.read().await;
            if let Some(existing) = adapters.get(name) {
                return existing.downcast::<S>(name);
            }
        }

        let mut adapters = self.adapters.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(existing) = adapters.get(name) {
            return existing.downcast::<S>(name);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Closed);
        }

        let adapter = Arc::new(
            ResilientAdapter::new(name, constructor(), config).map_err(|e| {
                RegistryError::InvalidConfig {
                    name: name.to_string(),
                    reason: e.to_string(),
                }
            })?,
        );

        adapters.insert(
            name.to_string(),
            RegisteredAdapter {
                managed: Arc::clone(&adapter) as Arc<dyn ManagedAdapter>,
                typed: Arc::clone(&adapter) as Arc<dyn Any + Send + Sync>,
            },
        );

        info!(
            adapter = name,
            total_adapters = adapters.len(),
            "Registered new adapter"
        );

        Ok(adapter)
    }

    /// Typed lookup; `Ok(None)` when nothing is registered under `name`
    pub async fn get<S: AdapterService>(
        &self,
        name: &str,
    ) -> Result<Option<Arc<ResilientAdapter<S>>>, RegistryError> {
        let adapters = self.adapters.read().await;
        adapters
            .get(name)
            .map(|registered| registered.downcast::<S>(name))
            .transpose()
    }

    /// Type-erased lookup
    pub async fn get_managed(&self, name: &str) -> Option<Arc<dyn ManagedAdapter>> {
        let adapters = self.adapters.read().await;
        adapters.get(name).map(|registered| Arc::clone(&registered.managed))
    }

    /// Unregister and close an adapter. Returns whether one was registered.
    pub async fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut adapters = self.adapters.write().await;
            adapters.remove(name)
        };

        match removed {
            Some(registered) => {
                registered.managed.close().await;
                info!(adapter = name, "Removed adapter");
                true
            }
            None => false,
        }
    }

    /// Registered adapter names, sorted
    pub async fn list(&self) -> Vec<String> {
        let adapters = self.adapters.read().await;
        let mut names: Vec<String> = adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.adapters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.adapters.read().await.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Reset every breaker and limiter and clear every adapter cache
    pub async fn reset_all(&self) {
        let managed = self.snapshot().await;
        warn!(adapter_count = managed.len(), "Resetting all adapters");
        join_all(managed.iter().map(|adapter| adapter.reset())).await;
    }

    /// Close every adapter and refuse further registrations
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::Release);

        let drained: Vec<RegisteredAdapter> = {
            let mut adapters = self.adapters.write().await;
            adapters.drain().map(|(_, registered)| registered).collect()
        };

        info!(adapter_count = drained.len(), "Closing all adapters");
        join_all(drained.iter().map(|registered| registered.managed.close())).await;
    }

    /// Health of every adapter plus the healthy/total score
    pub async fn get_all_health(&self) -> SystemAdapterHealth {
        let managed = self.snapshot().await;
        let adapters = managed
            .iter()
            .map(|adapter| (adapter.name().to_string(), adapter.health()))
            .collect::<HashMap<_, _>>();
        SystemAdapterHealth::from_adapters(adapters)
    }

    /// Metrics of every adapter plus summed counters
    pub async fn get_all_metrics(&self) -> SystemAdapterMetrics {
        let mut system_metrics = SystemAdapterMetrics::default();
        for adapter in self.snapshot().await {
            system_metrics.add_adapter(adapter.name().to_string(), adapter.metrics());
        }
        system_metrics
    }

    /// Clone out the handles so no lock is held across adapter awaits
    async fn snapshot(&self) -> Vec<Arc<dyn ManagedAdapter>> {
        let adapters = self.adapters.read().await;
        adapters
            .values()
            .map(|registered| Arc::clone(&registered.managed))
            .collect()
    }
}
