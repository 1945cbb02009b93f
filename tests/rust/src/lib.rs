//! Shared test utilities and fixtures for hostlink integration tests.

pub use mocks::{MockConnection, MockCounters, MockFactory, MockRequest};

/// Test fixture utilities
pub mod fixtures {
    use std::sync::Arc;
    use std::time::Duration;

    use hostlink_connect::PoolConfig;
    use hostlink_core::Endpoint;
    use uuid::Uuid;

    /// Endpoint with a random username, so pools in the global registry
    /// never collide across tests
    pub fn unique_endpoint() -> Arc<Endpoint> {
        let username = format!("user-{}", Uuid::new_v4().simple());
        Arc::new(Endpoint::new("127.0.0.1", 9400, username, "secret").unwrap())
    }

    pub fn endpoint(address: &str, port: u16) -> Arc<Endpoint> {
        Arc::new(Endpoint::new(address, port, "admin", "secret").unwrap())
    }

    /// Pool config without warm-up and with a short create retry
    pub fn pool_config(max_idle: usize, max_total: usize) -> PoolConfig {
        PoolConfig::default()
            .max_idle(max_idle)
            .max_total(max_total)
            .min_idle(0)
            .warm_up(false)
            .create_retry_interval(Duration::from_millis(10))
    }
}

/// Test log output, enabled with `RUST_LOG`
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
