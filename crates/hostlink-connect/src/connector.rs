//! Connector facade: binds a connection type and an endpoint to the shared pool

use std::sync::Arc;

use hostlink_core::Endpoint;

use crate::connection::{Connection, ConnectionFactory};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::registry::PoolRegistry;

pub struct Connector<C: Connection> {
    pool: Arc<ConnectionPool<C>>,
}

impl<C: Connection> Connector<C> {
    /// Connector backed by the process-wide registry
    pub async fn new(
        factory: Arc<dyn ConnectionFactory<C>>,
        endpoint: Arc<Endpoint>,
        config: PoolConfig,
    ) -> Self {
        Self::with_registry(PoolRegistry::global(), factory, endpoint, config).await
    }

    pub async fn with_registry(
        registry: &PoolRegistry,
        factory: Arc<dyn ConnectionFactory<C>>,
        endpoint: Arc<Endpoint>,
        config: PoolConfig,
    ) -> Self {
        let pool = registry.get_or_create(factory, endpoint, config).await;
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<C>> {
        &self.pool
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        self.pool.endpoint()
    }
}

impl<C: Connection> Clone for Connector<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}
