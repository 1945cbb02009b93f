//! # Hostlink Connect
//!
//! Connection pooling and protocol transports behind one
//! acquire / send / release contract.
//!
//! This crate provides:
//! - A `Connection` trait with lazy authentication shared by every transport
//! - `ConnectionPool`: bounded per-endpoint pool with blocking acquisition,
//!   idle eviction and eager warm-up
//! - `PoolRegistry`: one pool per (connection type, endpoint)
//! - `Connector`: facade binding a connection type and endpoint to its pool
//! - HTTP, interactive shell (SSH) and database-gateway transports
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        PoolRegistry                             │
//! │  HashMap<(connection type, endpoint id), ConnectionPool<C>>     │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     ConnectionPool<C>                           │
//! │   idle: [oldest ... newest]      active: {connection ids}       │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │ ConnectionFactory<C>
//!                              ▼
//! ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │  HttpConnection  │  │ ShellConnection  │  │GatewayConnection │
//! │    (reqwest)     │  │     (ssh2)       │  │ (DatabaseGateway)│
//! └──────────────────┘  └──────────────────┘  └──────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hostlink_connect::{Connection, Connector, PoolConfig};
//! use hostlink_connect::transports::http::{HttpConnectionFactory, HttpRequest};
//!
//! let endpoint = Arc::new(Endpoint::new("10.0.0.5", 443, "admin", "secret")?);
//! let settings = settings.connector("http");
//! let factory = Arc::new(HttpConnectionFactory::from_settings(&settings));
//! let connector = Connector::new(factory, endpoint, PoolConfig::from(&settings)).await;
//!
//! let mut connection = connector.pool().acquire().await?;
//! let response = connection.send(&HttpRequest::builder().path("/api/v1/ports").build()).await;
//! connector.pool().release(connection).await?;
//! ```

pub mod connection;
pub mod connector;
pub mod error;
pub mod pool;
pub mod registry;
pub mod transports;

pub use connection::{Connection, ConnectionCore, ConnectionFactory, ConnectionId, ConnectionState};
pub use connector::Connector;
pub use error::{ConnectionError, PoolError};
pub use pool::{ConnectionPool, PoolConfig, PoolStats};
pub use registry::{PoolKey, PoolRegistry};
