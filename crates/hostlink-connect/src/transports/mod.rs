//! Protocol transports
//!
//! Each transport provides a request type, a [`crate::Connection`]
//! implementation and a [`crate::ConnectionFactory`] for the pool. New
//! transports plug in the same way without touching the pool.
//!
//! - `http`: JSON-over-HTTP(S) via reqwest
//! - `shell`: interactive remote shell; `ssh` backs it with libssh2
//! - `gateway`: SQL through an external database gateway

pub mod gateway;
pub mod http;
pub mod shell;
pub mod ssh;

pub use gateway::{DatabaseGateway, GatewayConnection, GatewayConnectionFactory, GatewayRequest, GatewaySession, Row};
pub use http::{BasicAuth, HttpAuthenticator, HttpConnection, HttpConnectionFactory, HttpRequest, NoAuth, RawHttpResponse, TokenAuth};
pub use shell::{ReceivePolicy, ShellChannel, ShellConnection, ShellConnectionFactory, ShellConnector, ShellOptions, ShellRequest, ShellSession};
pub use ssh::Ssh2Connector;
