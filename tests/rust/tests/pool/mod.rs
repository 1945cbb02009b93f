//! Pool integration tests
//!
//! Capacity, blocking, eviction and lifecycle behaviour of `ConnectionPool`,
//! plus pool sharing through `PoolRegistry` and `Connector`.

mod lifecycle;
mod registry;
