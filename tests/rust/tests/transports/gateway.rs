//! Database gateway transport with an in-memory gateway

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hostlink_connect::transports::{
    DatabaseGateway, GatewayConnection, GatewayConnectionFactory, GatewayRequest, GatewaySession, Row,
};
use hostlink_connect::{Connection, ConnectionError, ConnectionFactory, Connector};
use hostlink_core::Endpoint;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tests::fixtures::pool_config;
use uuid::Uuid;

#[derive(Default)]
struct Journal {
    urls: Mutex<Vec<String>>,
    queries: Mutex<Vec<(String, Vec<Value>)>>,
    limits: Mutex<Vec<Option<usize>>>,
    commits: AtomicUsize,
    closes: AtomicUsize,
}

struct MemoryGateway {
    running: AtomicBool,
    journal: Arc<Journal>,
}

impl MemoryGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(true),
            journal: Arc::new(Journal::default()),
        })
    }
}

#[async_trait]
impl DatabaseGateway for MemoryGateway {
    fn scheme(&self) -> &str {
        "jdbc:postgresql"
    }

    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn connect(
        &self,
        db_url: &str,
        username: &str,
        password: &str,
    ) -> Result<Box<dyn GatewaySession>, ConnectionError> {
        if password != "secret" {
            return Err(ConnectionError::Gateway(format!("login failed for {}", username)));
        }
        self.journal.urls.lock().unwrap().push(db_url.to_string());
        Ok(Box::new(MemorySession {
            journal: Arc::clone(&self.journal),
            open: true,
        }))
    }
}

struct MemorySession {
    journal: Arc<Journal>,
    open: bool,
}

#[async_trait]
impl GatewaySession for MemorySession {
    async fn execute(
        &mut self,
        query: &str,
        params: &[Value],
        max_rows: Option<usize>,
    ) -> Result<Vec<Row>, ConnectionError> {
        self.journal
            .queries
            .lock()
            .unwrap()
            .push((query.to_string(), params.to_vec()));
        self.journal.limits.lock().unwrap().push(max_rows);
        if query.starts_with("SELECT") {
            // Ignores the limit, like a gateway without fetch-many support
            Ok(vec![
                vec![json!(1), json!("core-sw-01")],
                vec![json!(2), json!("core-sw-02")],
                vec![json!(3), json!("edge-rt-01")],
            ])
        } else {
            Err(ConnectionError::Gateway(format!("syntax error near '{}'", query)))
        }
    }

    async fn commit(&mut self) -> Result<(), ConnectionError> {
        self.journal.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.open = false;
        self.journal.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn database_endpoint(password: &str) -> Arc<Endpoint> {
    let endpoint = Endpoint::builder("10.1.2.3")
        .port(5432)
        .username(format!("inventory-{}", Uuid::new_v4().simple()))
        .password(password)
        .attribute("db_name", "inventory")
        .build()
        .unwrap();
    Arc::new(endpoint)
}

fn factory(gateway: &Arc<MemoryGateway>) -> Arc<dyn ConnectionFactory<GatewayConnection>> {
    Arc::new(GatewayConnectionFactory::new(gateway.clone()))
}

#[tokio::test]
async fn test_pooled_queries_authenticate_once() {
    let gateway = MemoryGateway::new();
    let connector = Connector::new(factory(&gateway), database_endpoint("secret"), pool_config(1, 1)).await;
    let pool = connector.pool();

    for id in 1..=3 {
        let mut connection = pool.acquire().await.unwrap();
        let request = GatewayRequest::new("SELECT id, name FROM devices WHERE id > ?").bind(vec![json!(id)]);
        let response = connection.send(&request).await;
        assert!(response.is_success(), "{:?}", response);
        pool.release(connection).await.unwrap();
    }

    assert_eq!(
        gateway.journal.urls.lock().unwrap().as_slice(),
        ["jdbc:postgresql://10.1.2.3:5432/inventory"]
    );
    let queries = gateway.journal.queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 3);
    assert_eq!(queries[2].1, vec![json!(3)]);

    pool.close().await;
    assert_eq!(gateway.journal.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rows_are_limited_and_returned_as_arrays() {
    let gateway = MemoryGateway::new();
    let mut connection = factory(&gateway).create(database_endpoint("secret")).await.unwrap();

    let response = connection
        .send(&GatewayRequest::new("SELECT id, name FROM devices").max_rows(2))
        .await;

    assert_eq!(response.code(), 200);
    assert_eq!(
        response.payload(),
        &json!([[1, "core-sw-01"], [2, "core-sw-02"]])
    );
    assert_eq!(gateway.journal.limits.lock().unwrap().as_slice(), [Some(2)]);
}

#[tokio::test]
async fn test_query_error_is_internal_error() {
    let gateway = MemoryGateway::new();
    let mut connection = factory(&gateway).create(database_endpoint("secret")).await.unwrap();

    let response = connection.send(&GatewayRequest::new("DROP devices")).await;

    assert_eq!(response.code(), 500);
    assert!(response.message().contains("syntax error"));
    // The session survives a failed statement
    assert!(connection.is_available().await);
}

#[tokio::test]
async fn test_rejected_login_is_code_zero() {
    let gateway = MemoryGateway::new();
    let mut connection = factory(&gateway).create(database_endpoint("wrong")).await.unwrap();

    let response = connection.send(&GatewayRequest::new("SELECT 1")).await;

    assert_eq!(response.code(), 0);
    assert!(!connection.is_auth());
    assert!(gateway.journal.queries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_commit_after_write() {
    let gateway = MemoryGateway::new();
    let mut connection = factory(&gateway).create(database_endpoint("secret")).await.unwrap();

    assert!(matches!(connection.commit().await, Err(ConnectionError::Closed)));

    connection.send(&GatewayRequest::new("SELECT 1")).await;
    connection.commit().await.unwrap();
    assert_eq!(gateway.journal.commits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stopped_gateway_fails_create() {
    let gateway = MemoryGateway::new();
    gateway.running.store(false, Ordering::SeqCst);

    let result = factory(&gateway).create(database_endpoint("secret")).await;
    assert!(matches!(result, Err(ConnectionError::Connect { .. })));
}
