//! Interactive shell transport
//!
//! Commands are written to a fresh interactive shell channel per request
//! and output is read until one of:
//! - the request's end marker appears in the accumulated output
//! - the remote signals exit status or closes the channel
//! - the read budget (`max_loops` waits of `wait` each) is spent
//!
//! The session layer is abstracted by [`ShellConnector`] / [`ShellSession`] /
//! [`ShellChannel`], which are blocking and always driven from
//! `spawn_blocking`. [`crate::transports::ssh`] provides the libssh2 backend.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostlink_core::{ConnectorSettings, Endpoint, Request, RequestParams, Response};
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::connection::{Connection, ConnectionCore, ConnectionFactory};
use crate::error::ConnectionError;
use crate::transports::ssh::Ssh2Connector;

/// Bounds on one output read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivePolicy {
    pub max_loops: usize,
    /// Wait per read attempt
    pub wait: Duration,
    pub chunk_size: usize,
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        Self {
            max_loops: 100,
            wait: Duration::from_secs(1),
            chunk_size: 1024,
        }
    }
}

impl ReceivePolicy {
    /// Overrides from `max_loops`, `read_wait_ms` and `chunk_size` extras
    pub fn from_settings(settings: &ConnectorSettings) -> Self {
        let defaults = Self::default();
        let extra = |key: &str| settings.extra.get(key).and_then(Value::as_u64);
        Self {
            max_loops: extra("max_loops").map_or(defaults.max_loops, |v| v as usize),
            wait: extra("read_wait_ms").map_or(defaults.wait, Duration::from_millis),
            chunk_size: extra("chunk_size").map_or(defaults.chunk_size, |v| v as usize),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOptions {
    pub connect_timeout: Duration,
    /// Protocol handshake bound
    pub banner_timeout: Duration,
    pub policy: ReceivePolicy,
}

impl ShellOptions {
    pub fn from_settings(settings: &ConnectorSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            banner_timeout: settings.banner_timeout(),
            policy: ReceivePolicy::from_settings(settings),
        }
    }
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self::from_settings(&ConnectorSettings::default())
    }
}

/// Bidirectional interactive channel
pub trait ShellChannel: Send {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `wait`.
    ///
    /// `Ok(None)` when nothing arrived in time, `Ok(Some(0))` when the
    /// remote closed the channel.
    fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Option<usize>>;

    fn exit_status_ready(&self) -> bool;

    fn close(&mut self) -> io::Result<()>;
}

/// Authenticated session able to open shell channels
pub trait ShellSession: Send + Sync {
    fn open_shell(&self) -> Result<Box<dyn ShellChannel>, ConnectionError>;

    fn is_active(&self) -> bool;

    fn disconnect(&self);
}

/// Opens and authenticates sessions
pub trait ShellConnector: Send + Sync {
    fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ShellOptions,
    ) -> Result<Arc<dyn ShellSession>, ConnectionError>;
}

/// Append the decodable prefix of `pending` to `output`.
///
/// A multi-byte sequence cut at the end of a chunk stays in `pending` for
/// the next read. Invalid bytes become U+FFFD.
fn decode_utf8(pending: &mut Vec<u8>, output: &mut String) {
    loop {
        match std::str::from_utf8(pending) {
            Ok(text) => {
                output.push_str(text);
                pending.clear();
                return;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                output.push_str(&String::from_utf8_lossy(&pending[..valid]));
                match e.error_len() {
                    None => {
                        pending.drain(..valid);
                        return;
                    }
                    Some(len) => {
                        output.push(char::REPLACEMENT_CHARACTER);
                        pending.drain(..valid + len);
                    }
                }
            }
        }
    }
}

/// Read output until the end marker, remote exit, remote close or the
/// loop budget, whichever comes first
pub fn receive_until<C>(channel: &mut C, end_marker: &str, policy: &ReceivePolicy) -> io::Result<String>
where
    C: ShellChannel + ?Sized,
{
    let mut output = String::new();
    let mut pending = Vec::new();
    let mut buf = vec![0u8; policy.chunk_size.max(1)];

    let mut loops = 0;
    loop {
        if loops >= policy.max_loops {
            warn!(max_loops = policy.max_loops, "Read budget exhausted before end of output");
            break;
        }
        loops += 1;

        match channel.read_chunk(&mut buf, policy.wait)? {
            None => {
                trace!(loops, "No data ready");
                continue;
            }
            Some(0) => {
                debug!("Channel closed by remote");
                break;
            }
            Some(n) => {
                pending.extend_from_slice(&buf[..n]);
                decode_utf8(&mut pending, &mut output);
            }
        }

        if channel.exit_status_ready() {
            break;
        }
        if !end_marker.is_empty() && output.contains(end_marker) {
            break;
        }
    }

    if !pending.is_empty() {
        output.push_str(&String::from_utf8_lossy(&pending));
    }
    Ok(output)
}

/// Empty waits tolerated before a shell that prints no greeting is assumed
const GREETING_MAX_WAITS: usize = 5;

/// Discard the login banner and first prompt.
///
/// Stops as soon as `end_marker` (when set) shows up; otherwise waits
/// briefly for output, then reads until the channel goes quiet.
fn drain_greeting<C>(channel: &mut C, end_marker: &str, policy: &ReceivePolicy) -> io::Result<()>
where
    C: ShellChannel + ?Sized,
{
    let mut buf = vec![0u8; policy.chunk_size.max(1)];
    let mut pending = Vec::new();
    let mut greeting = String::new();
    let mut received = false;
    let mut empty_waits = 0;
    for _ in 0..policy.max_loops {
        match channel.read_chunk(&mut buf, policy.wait)? {
            None if received => break,
            None => {
                empty_waits += 1;
                if empty_waits >= GREETING_MAX_WAITS {
                    break;
                }
            }
            Some(0) => break,
            Some(n) => {
                trace!(bytes = n, "Discarding greeting");
                received = true;
                if !end_marker.is_empty() {
                    pending.extend_from_slice(&buf[..n]);
                    decode_utf8(&mut pending, &mut greeting);
                    if greeting.contains(end_marker) {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// One command on a remote shell
#[derive(Debug, Clone)]
pub struct ShellRequest {
    params: RequestParams,
    interactive: bool,
    needs_auth: bool,
    follow_ups: Vec<(String, String)>,
}

impl ShellRequest {
    pub fn builder(text: impl Into<String>) -> ShellRequestBuilder {
        ShellRequestBuilder::new(text.into())
    }

    pub fn text(&self) -> String {
        self.params.get_str("text").unwrap_or_default()
    }

    /// Output substring that marks the command as finished; empty for none
    pub fn end_marker(&self) -> String {
        self.params.get_str("end_marker").unwrap_or_default()
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Reply for the first trigger (in insertion order) found in `output`
    pub fn follow_up_for(&self, output: &str) -> Option<&str> {
        self.follow_ups
            .iter()
            .find(|(trigger, _)| output.contains(trigger.as_str()))
            .map(|(_, reply)| reply.as_str())
    }

    pub fn params(&self) -> &RequestParams {
        &self.params
    }

    pub fn parse(&self, output: String) -> Response {
        Response::success(200, output)
    }
}

impl Request for ShellRequest {
    fn protocol(&self) -> &str {
        "ssh"
    }

    fn needs_auth(&self) -> bool {
        self.needs_auth
    }

    fn validate(&self) -> Result<(), String> {
        if self.text().is_empty() {
            return Err("no text".to_string());
        }
        Ok(())
    }
}

pub struct ShellRequestBuilder {
    params: RequestParams,
    interactive: bool,
    needs_auth: bool,
    follow_ups: Vec<(String, String)>,
}

impl ShellRequestBuilder {
    fn new(text: String) -> Self {
        let mut params = RequestParams::new();
        params.set_field("text", text);
        Self {
            params,
            interactive: false,
            needs_auth: true,
            follow_ups: Vec::new(),
        }
    }

    pub fn end_marker(mut self, marker: impl Into<String>) -> Self {
        self.params.set_field("end_marker", marker.into());
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// When `trigger` shows up in the output, answer with `reply`.
    /// Only consulted for interactive requests.
    pub fn follow_up(mut self, trigger: impl Into<String>, reply: impl Into<String>) -> Self {
        self.follow_ups.push((trigger.into(), reply.into()));
        self
    }

    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.set_kwarg(key, value);
        self
    }

    pub fn validator<F>(mut self, key: impl Into<String>, validator: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.params.set_validator(key, validator);
        self
    }

    pub fn needs_auth(mut self, needs_auth: bool) -> Self {
        self.needs_auth = needs_auth;
        self
    }

    pub fn build(self) -> ShellRequest {
        ShellRequest {
            params: self.params,
            interactive: self.interactive,
            needs_auth: self.needs_auth,
            follow_ups: self.follow_ups,
        }
    }
}

/// Owned copy of what the blocking worker needs
struct ShellExchange {
    command: String,
    end_marker: String,
    follow_ups: Option<ShellRequest>,
}

impl ShellExchange {
    fn new(request: &ShellRequest) -> Self {
        Self {
            command: request.text(),
            end_marker: request.end_marker(),
            follow_ups: request.is_interactive().then(|| request.clone()),
        }
    }

    fn run(&self, session: &dyn ShellSession, policy: &ReceivePolicy) -> Result<String, ConnectionError> {
        let mut channel = session.open_shell()?;
        drain_greeting(channel.as_mut(), &self.end_marker, policy)?;

        channel.write_all(format!("{}\n", self.command).as_bytes())?;
        let mut output = receive_until(channel.as_mut(), &self.end_marker, policy)?;

        if let Some(reply) = self
            .follow_ups
            .as_ref()
            .and_then(|request| request.follow_up_for(&output))
        {
            debug!(reply = %reply, "Sending follow-up");
            channel.write_all(format!("{}\n", reply).as_bytes())?;
            let more = receive_until(channel.as_mut(), &self.end_marker, policy)?;
            output.push_str(&more);
        }

        if let Err(e) = channel.close() {
            debug!(error = %e, "Failed to close shell channel");
        }
        Ok(output)
    }
}

pub struct ShellConnection {
    core: ConnectionCore,
    connector: Arc<dyn ShellConnector>,
    options: ShellOptions,
    session: Option<Arc<dyn ShellSession>>,
    /// Set when an exchange fails; cleared by the next login
    broken: bool,
}

impl ShellConnection {
    async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || session.disconnect()).await {
                warn!(connection = %self.core, error = %e, "Failed to disconnect shell session");
            }
        }
    }
}

#[async_trait]
impl Connection for ShellConnection {
    type Request = ShellRequest;
    const KIND: &'static str = "ssh";

    fn core(&self) -> &ConnectionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ConnectionCore {
        &mut self.core
    }

    /// A connection that has not connected yet counts as available
    async fn is_available(&self) -> bool {
        if self.core.is_closed() {
            return false;
        }
        if self.broken {
            return false;
        }
        match &self.session {
            Some(session) => {
                let session = Arc::clone(session);
                tokio::task::spawn_blocking(move || session.is_active())
                    .await
                    .unwrap_or(false)
            }
            None => true,
        }
    }

    async fn authenticate(&mut self, _request: Option<&ShellRequest>) -> Result<(), ConnectionError> {
        self.disconnect().await;

        let connector = Arc::clone(&self.connector);
        let endpoint = Arc::clone(self.core.endpoint());
        let options = self.options.clone();
        let session =
            tokio::task::spawn_blocking(move || connector.connect(&endpoint, &options)).await??;
        self.session = Some(session);
        self.broken = false;
        Ok(())
    }

    async fn dispatch(&mut self, request: &ShellRequest) -> Response {
        let Some(session) = self.session.clone() else {
            return Response::failure(0, "no auth");
        };

        let exchange = ShellExchange::new(request);
        let policy = self.options.policy.clone();
        let result = tokio::task::spawn_blocking(move || exchange.run(session.as_ref(), &policy))
            .await
            .map_err(ConnectionError::from)
            .and_then(|result| result);

        match result {
            Ok(output) => request.parse(output),
            Err(e) => {
                error!(connection = %self.core, error = %e, "Shell exchange failed");
                self.broken = true;
                Response::failure(500, e.to_string())
            }
        }
    }

    async fn shutdown(&mut self) {
        self.disconnect().await;
    }
}

pub struct ShellConnectionFactory {
    connector: Arc<dyn ShellConnector>,
    options: ShellOptions,
}

impl ShellConnectionFactory {
    /// libssh2-backed factory
    pub fn from_settings(settings: &ConnectorSettings) -> Self {
        Self::with_connector(Arc::new(Ssh2Connector), ShellOptions::from_settings(settings))
    }

    pub fn with_connector(connector: Arc<dyn ShellConnector>, options: ShellOptions) -> Self {
        Self { connector, options }
    }
}

#[async_trait]
impl ConnectionFactory<ShellConnection> for ShellConnectionFactory {
    async fn create(&self, endpoint: Arc<Endpoint>) -> Result<ShellConnection, ConnectionError> {
        Ok(ShellConnection {
            core: ConnectionCore::new(ShellConnection::KIND, endpoint),
            connector: Arc::clone(&self.connector),
            options: self.options.clone(),
            session: None,
            broken: false,
        })
    }
}
