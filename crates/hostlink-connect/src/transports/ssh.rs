//! libssh2 shell backend
//!
//! Blocking; callers run it inside `spawn_blocking`. Password
//! authentication with the endpoint credentials. Host keys are not checked.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostlink_core::Endpoint;
use ssh2::{Channel, Session};
use tracing::{debug, info};

use super::shell::{ShellChannel, ShellConnector, ShellOptions, ShellSession};
use crate::error::ConnectionError;

/// Seconds between keepalive messages sent by the liveness check
const KEEPALIVE_INTERVAL_SECS: u32 = 5;

/// libssh2 timeouts are milliseconds and 0 means "wait forever"
fn timeout_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX).max(1)
}

pub struct Ssh2Channel {
    channel: Channel,
    session: Session,
    broken: Arc<AtomicBool>,
}

impl Ssh2Channel {
    /// Any IO error other than a read timeout leaves the session unusable
    fn fail(&self, e: io::Error) -> io::Error {
        debug!(error = %e, "SSH channel IO failed, marking session broken");
        self.broken.store(true, Ordering::SeqCst);
        e
    }
}

impl ShellChannel for Ssh2Channel {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let result = self.channel.write_all(data).and_then(|()| self.channel.flush());
        result.map_err(|e| self.fail(e))
    }

    fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Option<usize>> {
        let previous = self.session.timeout();
        self.session.set_timeout(timeout_millis(wait));
        let result = self.channel.read(buf);
        self.session.set_timeout(previous);

        match result {
            Ok(n) => Ok(Some(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => Ok(None),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn exit_status_ready(&self) -> bool {
        self.channel.eof()
    }

    fn close(&mut self) -> io::Result<()> {
        self.channel.close()?;
        Ok(())
    }
}

pub struct Ssh2Session {
    session: Session,
    /// Set once the transport has failed; never cleared
    broken: Arc<AtomicBool>,
}

impl Ssh2Session {
    fn new(session: Session) -> Self {
        Self {
            session,
            broken: Arc::new(AtomicBool::new(false)),
        }
    }

    fn open_channel(&self) -> Result<Channel, ssh2::Error> {
        let mut channel = self.session.channel_session()?;
        channel.request_pty("vt100", None, None)?;
        channel.shell()?;
        Ok(channel)
    }
}

impl ShellSession for Ssh2Session {
    fn open_shell(&self) -> Result<Box<dyn ShellChannel>, ConnectionError> {
        let channel = self.open_channel().map_err(|e| {
            debug!(error = %e, "Opening shell channel failed, marking session broken");
            self.broken.store(true, Ordering::SeqCst);
            e
        })?;
        Ok(Box::new(Ssh2Channel {
            channel,
            session: self.session.clone(),
            broken: Arc::clone(&self.broken),
        }))
    }

    /// Broken flag plus a keepalive write; `authenticated()` survives a
    /// dead socket
    fn is_active(&self) -> bool {
        if self.broken.load(Ordering::SeqCst) || !self.session.authenticated() {
            return false;
        }
        match self.session.keepalive_send() {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "SSH keepalive failed");
                self.broken.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    fn disconnect(&self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!(error = %e, "SSH disconnect failed");
        }
    }
}

/// Connects over TCP, performs the handshake and password authentication
pub struct Ssh2Connector;

impl ShellConnector for Ssh2Connector {
    fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ShellOptions,
    ) -> Result<Arc<dyn ShellSession>, ConnectionError> {
        let connect_error = |reason: String| ConnectionError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };

        let addr = (endpoint.address(), endpoint.port())
            .to_socket_addrs()
            .map_err(|e| connect_error(e.to_string()))?
            .next()
            .ok_or_else(|| connect_error("address did not resolve".to_string()))?;
        let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)
            .map_err(|e| connect_error(e.to_string()))?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(options.banner_timeout));
        session
            .handshake()
            .map_err(|e| connect_error(format!("handshake failed: {}", e)))?;

        session.set_timeout(timeout_millis(options.connect_timeout));
        session
            .userauth_password(endpoint.username(), endpoint.password())
            .map_err(|e| ConnectionError::Auth {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        if !session.authenticated() {
            return Err(ConnectionError::Auth {
                endpoint: endpoint.to_string(),
                reason: "server did not accept the credentials".to_string(),
            });
        }

        session.set_keepalive(false, KEEPALIVE_INTERVAL_SECS);

        info!(endpoint = %endpoint, "SSH session established");
        Ok(Arc::new(Ssh2Session::new(session)))
    }
}
