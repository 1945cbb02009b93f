//! Endpoint identity
//!
//! An [`Endpoint`] describes one remote target: where it lives, which
//! credentials to present, and free-form attributes transports may read
//! (for example `db_name` for the database gateway).
//!
//! Two values are derived at construction and never change:
//! - `key`: `{model}://{netloc}@{username}`, used for logging
//! - `id`: UUIDv5 of the key in the DNS namespace, used to key pools

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use serde_json::{Map, Value};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Port used when none is given
pub const DEFAULT_PORT: u16 = 8080;

/// Version label used when none is given
pub const DEFAULT_VERSION: &str = "V1.0";

/// Validation errors raised while building an endpoint
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid address '{0}': expected an IP address or host name")]
    InvalidAddress(String),

    #[error("port must be in 1..=65535, got {0}")]
    InvalidPort(u16),
}

/// Immutable description of a remote target
#[derive(Clone)]
pub struct Endpoint {
    address: String,
    port: u16,
    username: String,
    password: Zeroizing<String>,
    name: String,
    category: String,
    model: String,
    version: String,
    description: String,
    attributes: Map<String, Value>,
    key: String,
    id: Uuid,
}

impl Endpoint {
    /// Start building an endpoint for `address`
    pub fn builder(address: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder::new(address)
    }

    /// Shorthand for the common address/port/credentials case
    pub fn new(
        address: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, EndpointError> {
        Self::builder(address)
            .port(port)
            .username(username)
            .password(password)
            .build()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `address:port`, with IPv6 addresses bracketed
    pub fn netloc(&self) -> String {
        match self.address.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]:{}", self.address, self.port),
            _ => format!("{}:{}", self.address, self.port),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Free-form attributes supplied at construction
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// String attribute, if present and a string
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Stable key: `{model}://{netloc}@{username}`
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Deterministic identifier derived from [`Endpoint::key`]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("name", &self.name)
            .field("category", &self.category)
            .field("version", &self.version)
            .field("password", &"<redacted>")
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Builder for [`Endpoint`]
#[derive(Clone)]
pub struct EndpointBuilder {
    address: String,
    port: u16,
    username: String,
    password: String,
    name: String,
    category: String,
    model: String,
    version: String,
    description: String,
    attributes: Map<String, Value>,
}

impl EndpointBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: String::new(),
            name: String::new(),
            category: String::new(),
            model: String::new(),
            version: DEFAULT_VERSION.to_string(),
            description: String::new(),
            attributes: Map::new(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Validate the address and port and derive the key and id
    pub fn build(self) -> Result<Endpoint, EndpointError> {
        let address = normalize_address(&self.address)?;
        if self.port == 0 {
            return Err(EndpointError::InvalidPort(self.port));
        }

        let mut endpoint = Endpoint {
            address,
            port: self.port,
            username: self.username,
            password: Zeroizing::new(self.password),
            name: self.name,
            category: self.category,
            model: self.model,
            version: self.version,
            description: self.description,
            attributes: self.attributes,
            key: String::new(),
            id: Uuid::nil(),
        };
        endpoint.key = format!(
            "{}://{}@{}",
            endpoint.model,
            endpoint.netloc(),
            endpoint.username
        );
        endpoint.id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, endpoint.key.as_bytes());
        Ok(endpoint)
    }
}

/// Canonicalize an IP address or validate a DNS host name
fn normalize_address(raw: &str) -> Result<String, EndpointError> {
    let trimmed = raw.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }

    match url::Host::parse(trimmed) {
        Ok(url::Host::Domain(domain)) => Ok(domain),
        Ok(url::Host::Ipv4(ip)) => Ok(ip.to_string()),
        Ok(url::Host::Ipv6(ip)) => Ok(ip.to_string()),
        _ => Err(EndpointError::InvalidAddress(raw.to_string())),
    }
}
