//! HTTP transport
//!
//! JSON-over-HTTP(S) requests against an endpoint. Each connection owns its
//! own `reqwest::Client` (one session per pooled connection). Relative paths
//! are resolved against `{protocol}://{netloc}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hostlink_core::{ConnectorSettings, Endpoint, Request, RequestParams, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::connection::{Connection, ConnectionCore, ConnectionFactory};
use crate::error::ConnectionError;

pub const DEFAULT_PROTOCOL: &str = "https";

pub const USER_AGENT: &str = concat!("hostlink/", env!("CARGO_PKG_VERSION"));

fn default_headers() -> Map<String, Value> {
    let mut headers = Map::new();
    headers.insert("Accept".to_string(), json!("application/json"));
    headers.insert("User-Agent".to_string(), json!(USER_AGENT));
    headers.insert("Charset".to_string(), json!("UTF-8"));
    headers
}

fn join_url(protocol: &str, endpoint: &Endpoint, path: &str) -> String {
    format!(
        "{}://{}/{}",
        protocol,
        endpoint.netloc(),
        path.trim_start_matches('/')
    )
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_pairs(map: Map<String, Value>) -> Vec<(String, String)> {
    map.into_iter()
        .map(|(key, value)| (key, value_to_string(&value)))
        .collect()
}

/// Status and decoded body of a completed exchange; `body` is `None` when
/// the bytes were not valid UTF-8
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHttpResponse {
    pub status: u16,
    pub body: Option<String>,
}

/// One HTTP call.
///
/// Parameter keys: `method`, `url`, `path`, `headers`, `params` (query),
/// `data` (form body), `json` (JSON body).
#[derive(Debug, Clone)]
pub struct HttpRequest {
    params: RequestParams,
    protocol: String,
    needs_auth: bool,
}

impl HttpRequest {
    pub fn builder() -> HttpRequestBuilder {
        HttpRequestBuilder::new()
    }

    pub fn method(&self) -> String {
        self.params
            .get_str("method")
            .map(|m| m.to_uppercase())
            .unwrap_or_else(|| "GET".to_string())
    }

    pub fn url(&self) -> Option<String> {
        self.params.get_str("url")
    }

    pub fn path(&self) -> Option<String> {
        self.params.get_str("path")
    }

    pub fn headers(&self) -> Map<String, Value> {
        self.params.get_object("headers")
    }

    pub fn query(&self) -> Map<String, Value> {
        self.params.get_object("params")
    }

    pub fn form(&self) -> Map<String, Value> {
        self.params.get_object("data")
    }

    pub fn json(&self) -> Option<Value> {
        self.params.get("json").filter(|v| !v.is_null())
    }

    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    /// Absolute URL for this request against `endpoint`
    pub fn target(&self, endpoint: &Endpoint) -> String {
        let location = self.url().or_else(|| self.path()).unwrap_or_default();
        if location.contains("://") {
            location
        } else {
            join_url(&self.protocol, endpoint, &location)
        }
    }

    /// Map a raw exchange to a [`Response`].
    ///
    /// Missing response or undecodable body is a 500 failure; non-2xx keeps
    /// the remote status. A body that is not JSON is returned as the
    /// failure payload.
    pub fn parse(&self, raw: Option<RawHttpResponse>) -> Response {
        let Some(raw) = raw else {
            return Response::failure(500, "no response received");
        };

        if !(200..300).contains(&raw.status) {
            let reason = StatusCode::from_u16(raw.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("unknown status");
            let response =
                Response::failure(raw.status, format!("remote returned {} {}", raw.status, reason));
            return match raw.body {
                Some(body) if !body.is_empty() => response.with_payload(body),
                _ => response,
            };
        }

        let Some(body) = raw.body else {
            return Response::failure(500, "response body is not valid UTF-8");
        };
        match serde_json::from_str::<Value>(&body) {
            Ok(payload) => Response::success(200, payload),
            Err(e) => Response::failure(500, format!("response body is not JSON: {}", e))
                .with_payload(body),
        }
    }
}

impl Request for HttpRequest {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn needs_auth(&self) -> bool {
        self.needs_auth
    }
}

pub struct HttpRequestBuilder {
    params: RequestParams,
    headers: Map<String, Value>,
    protocol: String,
    needs_auth: bool,
}

impl HttpRequestBuilder {
    fn new() -> Self {
        Self {
            params: RequestParams::new(),
            headers: default_headers(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            needs_auth: true,
        }
    }

    pub fn method(mut self, method: &str) -> Self {
        self.params.set_field("method", method.to_uppercase());
        self
    }

    /// Absolute URL, or a path relative to the endpoint
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.params.set_field("url", url.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.params.set_field("path", path.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut query = self.params.get_object("params");
        query.insert(key.into(), value.into());
        self.params.set_field("params", Value::Object(query));
        self
    }

    pub fn form(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut form = self.params.get_object("data");
        form.insert(key.into(), value.into());
        self.params.set_field("data", Value::Object(form));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.params.set_field("json", body);
        self
    }

    /// Caller-supplied parameter, used when no explicit field is set
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.set_kwarg(key, value);
        self
    }

    pub fn kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        for (key, value) in kwargs {
            self.params.set_kwarg(key, value);
        }
        self
    }

    pub fn validator<F>(mut self, key: impl Into<String>, validator: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.params.set_validator(key, validator);
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn needs_auth(mut self, needs_auth: bool) -> Self {
        self.needs_auth = needs_auth;
        self
    }

    pub fn build(mut self) -> HttpRequest {
        self.params.set_field("headers", Value::Object(self.headers));
        HttpRequest {
            params: self.params,
            protocol: self.protocol,
            needs_auth: self.needs_auth,
        }
    }
}

/// Produces the headers an authenticated connection adds to every request
#[async_trait]
pub trait HttpAuthenticator: Send + Sync {
    async fn authenticate(
        &self,
        client: &Client,
        endpoint: &Endpoint,
    ) -> Result<HeaderMap, ConnectionError>;
}

/// No credentials; authentication always succeeds
pub struct NoAuth;

#[async_trait]
impl HttpAuthenticator for NoAuth {
    async fn authenticate(&self, _client: &Client, _endpoint: &Endpoint) -> Result<HeaderMap, ConnectionError> {
        Ok(HeaderMap::new())
    }
}

/// `Authorization: Basic` from the endpoint credentials
pub struct BasicAuth;

#[async_trait]
impl HttpAuthenticator for BasicAuth {
    async fn authenticate(&self, _client: &Client, endpoint: &Endpoint) -> Result<HeaderMap, ConnectionError> {
        if endpoint.username().is_empty() {
            return Err(ConnectionError::Auth {
                endpoint: endpoint.to_string(),
                reason: "no username configured".to_string(),
            });
        }

        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", endpoint.username(), endpoint.password()));
        let mut value = HeaderValue::from_str(&format!("Basic {}", credentials))
            .map_err(|e| ConnectionError::Auth {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }
}

/// Log in with a JSON `{"username", "password"}` POST and carry the
/// returned token in a header
pub struct TokenAuth {
    path: String,
    header: String,
    token_pointer: String,
    protocol: String,
}

impl TokenAuth {
    pub fn new(path: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            header: header.into(),
            token_pointer: "/token".to_string(),
            protocol: DEFAULT_PROTOCOL.to_string(),
        }
    }

    /// JSON pointer to the token in the login response
    pub fn token_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.token_pointer = pointer.into();
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }
}

#[async_trait]
impl HttpAuthenticator for TokenAuth {
    async fn authenticate(&self, client: &Client, endpoint: &Endpoint) -> Result<HeaderMap, ConnectionError> {
        let auth_error = |reason: String| ConnectionError::Auth {
            endpoint: endpoint.to_string(),
            reason,
        };

        let name = HeaderName::from_bytes(self.header.as_bytes())
            .map_err(|e| ConnectionError::Config(format!("invalid token header '{}': {}", self.header, e)))?;

        let url = join_url(&self.protocol, endpoint, &self.path);
        let response = client
            .post(&url)
            .json(&json!({
                "username": endpoint.username(),
                "password": endpoint.password(),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(auth_error(format!("login returned {}", status)));
        }

        let body: Value = response.json().await?;
        let token = body
            .pointer(&self.token_pointer)
            .and_then(Value::as_str)
            .ok_or_else(|| auth_error(format!("no token at '{}'", self.token_pointer)))?;

        let mut value = HeaderValue::from_str(token).map_err(|e| auth_error(e.to_string()))?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(name, value);
        Ok(headers)
    }
}

pub struct HttpConnection {
    core: ConnectionCore,
    client: Client,
    authenticator: Arc<dyn HttpAuthenticator>,
    auth_headers: HeaderMap,
}

impl HttpConnection {
    async fn execute(&self, request: &HttpRequest) -> Result<RawHttpResponse, ConnectionError> {
        let method = Method::from_bytes(request.method().as_bytes())
            .map_err(|e| ConnectionError::InvalidRequest(format!("invalid method: {}", e)))?;
        let url = request.target(self.core.endpoint());

        let mut builder = self.client.request(method, &url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value_to_string(&value));
        }
        builder = builder.headers(self.auth_headers.clone());

        let query = to_pairs(request.query());
        if !query.is_empty() {
            builder = builder.query(&query);
        }
        let form = to_pairs(request.form());
        if !form.is_empty() {
            builder = builder.form(&form);
        }
        if let Some(body) = request.json() {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(
            connection = %self.core,
            url = %url,
            status,
            bytes = body.len(),
            "HTTP response received"
        );

        Ok(RawHttpResponse {
            status,
            body: String::from_utf8(body.to_vec()).ok(),
        })
    }
}

#[async_trait]
impl Connection for HttpConnection {
    type Request = HttpRequest;
    const KIND: &'static str = "http";

    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ConnectionCore {
        &mut self.core
    }

    async fn is_available(&self) -> bool {
        !self.core.is_closed()
    }

    async fn authenticate(&mut self, _request: Option<&HttpRequest>) -> Result<(), ConnectionError> {
        let headers = self
            .authenticator
            .authenticate(&self.client, self.core.endpoint())
            .await?;
        self.auth_headers = headers;
        Ok(())
    }

    async fn dispatch(&mut self, request: &HttpRequest) -> Response {
        match self.execute(request).await {
            Ok(raw) => request.parse(Some(raw)),
            Err(e) => {
                error!(connection = %self.core, error = %e, "HTTP request failed");
                Response::failure(500, e.to_string())
            }
        }
    }

    async fn shutdown(&mut self) {
        self.auth_headers.clear();
    }
}

pub struct HttpConnectionFactory {
    /// Bounds connection setup only; responses may take as long as they need
    connect_timeout: Duration,
    verify_tls: bool,
    authenticator: Arc<dyn HttpAuthenticator>,
}

impl HttpConnectionFactory {
    pub fn from_settings(settings: &ConnectorSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            verify_tls: settings.verify_tls,
            authenticator: Arc::new(NoAuth),
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn HttpAuthenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    fn build_client(&self) -> Result<Client, ConnectionError> {
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .danger_accept_invalid_certs(!self.verify_tls)
            .build()?;
        Ok(client)
    }
}

impl Default for HttpConnectionFactory {
    fn default() -> Self {
        Self::from_settings(&ConnectorSettings::default())
    }
}

#[async_trait]
impl ConnectionFactory<HttpConnection> for HttpConnectionFactory {
    async fn create(&self, endpoint: Arc<Endpoint>) -> Result<HttpConnection, ConnectionError> {
        Ok(HttpConnection {
            core: ConnectionCore::new(HttpConnection::KIND, endpoint),
            client: self.build_client()?,
            authenticator: Arc::clone(&self.authenticator),
            auth_headers: HeaderMap::new(),
        })
    }
}
