//! # Hostlink Core Library
//!
//! Transport-independent building blocks shared by every connection type.
//!
//! ## Modules
//!
//! - `endpoint` - Endpoint identity (address, port, credentials, derived key)
//! - `request` - Request parameter bag with per-key validators
//! - `response` - Success/failure response value
//! - `settings` - Per-connection-type settings loaded from JSON
//! - `logging` - Tracing subscriber initialization

pub mod endpoint;
pub mod logging;
pub mod request;
pub mod response;
pub mod settings;

pub use endpoint::{Endpoint, EndpointBuilder, EndpointError};
pub use logging::{init_tracing, LoggingError};
pub use request::{Request, RequestParams, Validator};
pub use response::{Response, Status};
pub use settings::{ConnectorSettings, LoggingSettings, Settings, SettingsError};
