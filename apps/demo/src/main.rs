//! Send one pooled HTTP GET and log the response.
//!
//! Usage: `hostlink-demo <address> <port> [path] [settings.json]`
//!
//! Credentials come from `HOSTLINK_USERNAME` / `HOSTLINK_PASSWORD`
//! (a `.env` file is honored).

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use hostlink_connect::transports::{BasicAuth, HttpConnection, HttpConnectionFactory, HttpRequest};
use hostlink_connect::{Connection, ConnectionFactory, Connector, PoolConfig, PoolRegistry};
use hostlink_core::{init_tracing, Endpoint, Settings};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        bail!("usage: hostlink-demo <address> <port> [path] [settings.json]");
    }

    let settings = match args.get(3) {
        Some(path) => Settings::from_file(path).with_context(|| format!("loading settings from {}", path))?,
        None => Settings::default(),
    };
    let _log_guard = init_tracing(&settings.logging).context("initializing logging")?;

    let port: u16 = args[1].parse().with_context(|| format!("invalid port '{}'", args[1]))?;
    let path = args.get(2).map(String::as_str).unwrap_or("/");
    let username = std::env::var("HOSTLINK_USERNAME").unwrap_or_default();
    let password = std::env::var("HOSTLINK_PASSWORD").unwrap_or_default();

    let endpoint = Arc::new(Endpoint::new(args[0].as_str(), port, username.as_str(), password)?);
    let http_settings = settings.connector(HttpConnection::KIND);

    let mut factory = HttpConnectionFactory::from_settings(&http_settings);
    if !username.is_empty() {
        factory = factory.with_authenticator(Arc::new(BasicAuth));
    }
    let factory: Arc<dyn ConnectionFactory<HttpConnection>> = Arc::new(factory);

    let connector = Connector::new(factory, endpoint, PoolConfig::from(&http_settings)).await;
    let pool = connector.pool();
    info!(pool = %pool.name(), endpoint = %connector.endpoint(), "Connector ready");

    let request = HttpRequest::builder()
        .path(path)
        .needs_auth(!username.is_empty())
        .build();

    let mut connection = pool.acquire().await?;
    let response = connection.send(&request).await;
    pool.release(connection).await?;

    if response.is_success() {
        info!(code = response.code(), "Request succeeded");
        println!("{}", serde_json::to_string_pretty(response.payload())?);
    } else {
        warn!(code = response.code(), message = %response.message(), "Request failed");
    }

    info!(stats = ?pool.stats().await, "Pool statistics");
    PoolRegistry::global().close_all().await;
    Ok(())
}
