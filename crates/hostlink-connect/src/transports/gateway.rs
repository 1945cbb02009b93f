//! Database gateway transport
//!
//! SQL executed through an external gateway process that owns the
//! database drivers. The gateway is an opaque "connect, execute, get rows"
//! capability; this module adapts it to the [`Connection`] contract.
//!
//! The database URL is `{scheme}://{netloc}/{db_name}` where `db_name` is
//! an endpoint attribute.

use std::sync::Arc;

use async_trait::async_trait;
use hostlink_core::{Endpoint, Request, RequestParams, Response};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::connection::{Connection, ConnectionCore, ConnectionFactory};
use crate::error::ConnectionError;

/// One result row, columns in select order
pub type Row = Vec<Value>;

#[async_trait]
pub trait DatabaseGateway: Send + Sync {
    /// URL scheme understood by the gateway, e.g. `jdbc:postgresql`
    fn scheme(&self) -> &str;

    async fn is_running(&self) -> bool;

    async fn connect(
        &self,
        db_url: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn GatewaySession>, ConnectionError>;
}

/// Open database session on the gateway
#[async_trait]
pub trait GatewaySession: Send + Sync {
    /// Run `query`, fetching at most `max_rows` rows when a limit is set
    async fn execute(
        &mut self,
        query: &str,
        params: &[Value],
        max_rows: Option<usize>,
    ) -> Result<Vec<Row>, ConnectionError>;

    async fn commit(&mut self) -> Result<(), ConnectionError>;

    async fn rollback(&mut self) -> Result<(), ConnectionError>;

    fn is_open(&self) -> bool;

    async fn close(&mut self) -> Result<(), ConnectionError>;
}

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    params: RequestParams,
    needs_auth: bool,
}

impl GatewayRequest {
    pub fn new(query: impl Into<String>) -> Self {
        let mut params = RequestParams::new();
        params.set_field("query", query.into());
        Self {
            params,
            needs_auth: true,
        }
    }

    /// Positional bind parameters
    pub fn bind(mut self, values: Vec<Value>) -> Self {
        self.params.set_field("params", Value::Array(values));
        self
    }

    /// Fetch at most `max_rows` rows
    pub fn max_rows(mut self, max_rows: usize) -> Self {
        self.params.set_field("max_rows", max_rows);
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.set_kwarg(key, value);
        self
    }

    pub fn needs_auth(mut self, needs_auth: bool) -> Self {
        self.needs_auth = needs_auth;
        self
    }

    pub fn query(&self) -> String {
        self.params.get_str("query").unwrap_or_default()
    }

    pub fn bind_params(&self) -> Vec<Value> {
        match self.params.get("params") {
            Some(Value::Array(values)) => values,
            _ => Vec::new(),
        }
    }

    pub fn row_limit(&self) -> Option<usize> {
        self.params
            .get("max_rows")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
    }

    /// Rows beyond the limit are dropped if a session returns more
    pub fn parse(&self, mut rows: Vec<Row>) -> Response {
        if let Some(limit) = self.row_limit() {
            rows.truncate(limit);
        }
        let rows: Vec<Value> = rows.into_iter().map(Value::Array).collect();
        Response::success(200, Value::Array(rows))
    }
}

impl Request for GatewayRequest {
    fn protocol(&self) -> &str {
        "jdbc"
    }

    fn needs_auth(&self) -> bool {
        self.needs_auth
    }

    fn validate(&self) -> Result<(), String> {
        if self.query().trim().is_empty() {
            return Err("no query".to_string());
        }
        Ok(())
    }
}

pub struct GatewayConnection {
    core: ConnectionCore,
    gateway: Arc<dyn DatabaseGateway>,
    db_url: String,
    session: Option<Box<dyn GatewaySession>>,
}

impl GatewayConnection {
    pub fn db_url(&self) -> &str {
        &self.db_url
    }

    pub async fn commit(&mut self) -> Result<(), ConnectionError> {
        self.session.as_mut().ok_or(ConnectionError::Closed)?.commit().await
    }

    pub async fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.session.as_mut().ok_or(ConnectionError::Closed)?.rollback().await
    }
}

#[async_trait]
impl Connection for GatewayConnection {
    type Request = GatewayRequest;
    const KIND: &'static str = "gateway";

    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ConnectionCore {
        &mut self.core
    }

    async fn is_available(&self) -> bool {
        if self.core.is_closed() {
            return false;
        }
        self.session.as_ref().map_or(true, |session| session.is_open())
    }

    async fn authenticate(&mut self, _request: Option<&GatewayRequest>) -> Result<(), ConnectionError> {
        let endpoint = Arc::clone(self.core.endpoint());
        let session = self
            .gateway
            .connect(&self.db_url, endpoint.username(), endpoint.password())
            .await?;
        self.session = Some(session);
        Ok(())
    }

    async fn dispatch(&mut self, request: &GatewayRequest) -> Response {
        let Some(session) = self.session.as_mut() else {
            return Response::failure(0, "no auth");
        };

        let query = request.query();
        debug!(connection = %self.core, query = %query, "Executing query");
        match session
            .execute(&query, &request.bind_params(), request.row_limit())
            .await
        {
            Ok(rows) => request.parse(rows),
            Err(e) => {
                error!(connection = %self.core, error = %e, "Query failed");
                Response::failure(500, e.to_string())
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(connection = %self.core, error = %e, "Failed to close gateway session");
            }
        }
    }
}

pub struct GatewayConnectionFactory {
    gateway: Arc<dyn DatabaseGateway>,
}

impl GatewayConnectionFactory {
    pub fn new(gateway: Arc<dyn DatabaseGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ConnectionFactory<GatewayConnection> for GatewayConnectionFactory {
    async fn create(&self, endpoint: Arc<Endpoint>) -> Result<GatewayConnection, ConnectionError> {
        let db_name = endpoint
            .attribute_str("db_name")
            .ok_or_else(|| ConnectionError::Config(format!("endpoint {} has no db_name attribute", endpoint)))?;
        let db_url = format!("{}://{}/{}", self.gateway.scheme(), endpoint.netloc(), db_name);

        if !self.gateway.is_running().await {
            return Err(ConnectionError::Connect {
                endpoint: endpoint.to_string(),
                reason: "database gateway is not running".to_string(),
            });
        }

        Ok(GatewayConnection {
            core: ConnectionCore::new(GatewayConnection::KIND, endpoint),
            gateway: Arc::clone(&self.gateway),
            db_url,
            session: None,
        })
    }
}
