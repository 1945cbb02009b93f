//! Pool Registry
//!
//! At most one [`ConnectionPool`] exists per (connection type, endpoint id)
//! within a registry. Pools of different connection types live side by side
//! as type-erased handles and are recovered by downcasting.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use hostlink_core::Endpoint;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionFactory};
use crate::pool::{ConnectionPool, PoolConfig, PoolStats};

/// Registry key: connection type plus endpoint identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey {
    type_id: TypeId,
    kind: &'static str,
    endpoint_id: Uuid,
}

impl PoolKey {
    pub fn of<C: Connection>(endpoint: &Endpoint) -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            kind: C::KIND,
            endpoint_id: endpoint.id(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn endpoint_id(&self) -> Uuid {
        self.endpoint_id
    }
}

/// Per-key slot; the pool is built once, outside the registry lock
type PoolCell<C> = OnceCell<Arc<ConnectionPool<C>>>;

/// Type-erased view of a pool slot
#[async_trait]
trait ManagedPool: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    async fn close(&self);

    /// `None` while the pool is still being built
    async fn stats(&self) -> Option<PoolStats>;
}

#[async_trait]
impl<C: Connection> ManagedPool for PoolCell<C> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    async fn close(&self) {
        if let Some(pool) = self.get() {
            pool.close().await;
        }
    }

    async fn stats(&self) -> Option<PoolStats> {
        match self.get() {
            Some(pool) => Some(pool.stats().await),
            None => None,
        }
    }
}

fn same_slot<C: Connection>(slot: &Arc<dyn ManagedPool>, cell: &Arc<PoolCell<C>>) -> bool {
    Arc::as_ptr(slot) as *const () == Arc::as_ptr(cell) as *const ()
}

#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<PoolKey, Arc<dyn ManagedPool>>>,
}

static GLOBAL_REGISTRY: OnceLock<PoolRegistry> = OnceLock::new();

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by [`crate::Connector::new`]
    pub fn global() -> &'static PoolRegistry {
        GLOBAL_REGISTRY.get_or_init(PoolRegistry::new)
    }

    /// Return the pool for `C` and `endpoint`, creating it on first use.
    ///
    /// The registry lock only covers fetching or inserting the key's slot.
    /// Construction (including warm-up) runs on the slot, so concurrent
    /// first callers for one key observe the same pool while other keys
    /// proceed. `factory` and `config` are ignored when the pool already
    /// exists.
    pub async fn get_or_create<C: Connection>(
        &self,
        factory: Arc<dyn ConnectionFactory<C>>,
        endpoint: Arc<Endpoint>,
        config: PoolConfig,
    ) -> Arc<ConnectionPool<C>> {
        let key = PoolKey::of::<C>(&endpoint);
        let cell = self.slot::<C>(key, &endpoint).await;

        if let Some(pool) = cell.get() {
            debug!(pool = %pool.name(), "Reusing connection pool");
            return Arc::clone(pool);
        }

        let pool = cell
            .get_or_init(|| self.build(key, &cell, factory, endpoint, config))
            .await;
        Arc::clone(pool)
    }

    async fn slot<C: Connection>(&self, key: PoolKey, endpoint: &Endpoint) -> Arc<PoolCell<C>> {
        let mut pools = self.pools.lock().await;

        if let Some(slot) = pools.get(&key) {
            match Arc::clone(slot).into_any().downcast::<PoolCell<C>>() {
                Ok(cell) => return cell,
                Err(_) => {
                    warn!(kind = C::KIND, endpoint = %endpoint, "Registered pool has unexpected type, replacing");
                }
            }
        }

        let cell: Arc<PoolCell<C>> = Arc::new(OnceCell::new());
        pools.insert(key, Arc::clone(&cell) as Arc<dyn ManagedPool>);
        cell
    }

    async fn build<C: Connection>(
        &self,
        key: PoolKey,
        cell: &Arc<PoolCell<C>>,
        factory: Arc<dyn ConnectionFactory<C>>,
        endpoint: Arc<Endpoint>,
        config: PoolConfig,
    ) -> Arc<ConnectionPool<C>> {
        let pool = Arc::new(ConnectionPool::new(factory, endpoint, config).await);

        let (registered, count) = {
            let pools = self.pools.lock().await;
            let registered = pools.get(&key).is_some_and(|slot| same_slot(slot, cell));
            (registered, pools.len())
        };
        if registered {
            info!(pool = %pool.name(), pools = count, "Registered connection pool");
        } else {
            warn!(pool = %pool.name(), "Pool was unregistered while warming up, closing it");
            pool.close().await;
        }
        pool
    }

    pub async fn get<C: Connection>(&self, endpoint: &Endpoint) -> Option<Arc<ConnectionPool<C>>> {
        let pools = self.pools.lock().await;
        let slot = pools.get(&PoolKey::of::<C>(endpoint))?;
        let cell = Arc::clone(slot).into_any().downcast::<PoolCell<C>>().ok()?;
        cell.get().cloned()
    }

    /// Unregister and close the pool for `C` and `endpoint`
    pub async fn remove<C: Connection>(&self, endpoint: &Endpoint) -> bool {
        let removed = self.pools.lock().await.remove(&PoolKey::of::<C>(endpoint));
        match removed {
            Some(pool) => {
                pool.close().await;
                true
            }
            None => false,
        }
    }

    /// Close and unregister every pool
    pub async fn close_all(&self) {
        let pools: Vec<_> = self.pools.lock().await.drain().collect();
        info!(count = pools.len(), "Closing all connection pools");
        for (_, pool) in pools {
            pool.close().await;
        }
    }

    pub async fn stats(&self) -> Vec<(PoolKey, PoolStats)> {
        let handles: Vec<_> = self
            .pools
            .lock()
            .await
            .iter()
            .map(|(key, pool)| (*key, Arc::clone(pool)))
            .collect();

        let mut stats = Vec::with_capacity(handles.len());
        for (key, pool) in handles {
            if let Some(pool_stats) = pool.stats().await {
                stats.push((key, pool_stats));
            }
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.pools.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.lock().await.is_empty()
    }
}
