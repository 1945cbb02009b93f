//! Connection contract shared by every transport
//!
//! A connection is a single logical session to one endpoint. It is
//! created unauthenticated, authenticates lazily on the first request that
//! needs it, and is closed exactly once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostlink_core::{Endpoint, Request, Response};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ConnectionError;

/// Process-unique connection identifier
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Bookkeeping every transport embeds
#[derive(Debug)]
pub struct ConnectionCore {
    id: ConnectionId,
    kind: &'static str,
    endpoint: Arc<Endpoint>,
    state: ConnectionState,
    created_at: Instant,
    last_used: Instant,
}

impl ConnectionCore {
    pub fn new(kind: &'static str, endpoint: Arc<Endpoint>) -> Self {
        let now = Instant::now();
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            endpoint,
            state: ConnectionState::Unauthenticated,
            created_at: now,
            last_used: now,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_auth(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Time since the connection was last sent on or returned to a pool
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Closed is terminal
    pub fn mark_authenticated(&mut self) {
        if self.state == ConnectionState::Unauthenticated {
            self.state = ConnectionState::Authenticated;
        }
    }

    pub fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }
}

impl fmt::Display for ConnectionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.kind, self.id, self.endpoint.netloc())
    }
}

/// A pooled session to one endpoint.
///
/// Implementors provide the transport hooks (`authenticate`, `dispatch`,
/// `shutdown`, `is_available`); `send` and `close` drive them and keep the
/// state machine consistent. `send` never returns an error: every outcome
/// is a [`Response`].
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Request: Request;

    /// Connection type label, also used as the settings key
    const KIND: &'static str;

    fn core(&self) -> &ConnectionCore;

    fn core_mut(&mut self) -> &mut ConnectionCore;

    /// Transport liveness; a closed connection is never available
    async fn is_available(&self) -> bool;

    /// Establish credentials on the transport. State is updated by the caller.
    async fn authenticate(&mut self, request: Option<&Self::Request>) -> Result<(), ConnectionError>;

    /// Perform the request on an authenticated transport
    async fn dispatch(&mut self, request: &Self::Request) -> Response;

    /// Release transport resources
    async fn shutdown(&mut self);

    fn id(&self) -> ConnectionId {
        self.core().id()
    }

    fn endpoint(&self) -> &Arc<Endpoint> {
        self.core().endpoint()
    }

    fn is_auth(&self) -> bool {
        self.core().is_auth()
    }

    fn is_closed(&self) -> bool {
        self.core().is_closed()
    }

    /// Authenticate if not already authenticated
    async fn ensure_authenticated(
        &mut self,
        request: Option<&Self::Request>,
    ) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        if self.is_auth() {
            return Ok(());
        }
        self.authenticate(request).await?;
        self.core_mut().mark_authenticated();
        info!(connection = %self.core(), "Connection authenticated");
        Ok(())
    }

    async fn send(&mut self, request: &Self::Request) -> Response {
        if self.is_closed() {
            return Response::failure(0, "connection is closed");
        }
        if let Err(message) = request.validate() {
            debug!(connection = %self.core(), message = %message, "Request rejected");
            return Response::failure(0, message);
        }
        if request.needs_auth() && !self.is_auth() {
            if let Err(e) = self.ensure_authenticated(Some(request)).await {
                warn!(connection = %self.core(), error = %e, "Authentication failed");
                return Response::failure(0, "no auth");
            }
        }

        self.core_mut().touch();
        debug!(
            connection = %self.core(),
            protocol = request.protocol(),
            "Dispatching request"
        );
        self.dispatch(request).await
    }

    /// Idempotent
    async fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        self.shutdown().await;
        self.core_mut().mark_closed();
        debug!(connection = %self.core(), "Connection closed");
    }
}

/// Creates connections for a pool
#[async_trait]
pub trait ConnectionFactory<C: Connection>: Send + Sync + 'static {
    async fn create(&self, endpoint: Arc<Endpoint>) -> Result<C, ConnectionError>;
}
