use {
    std::{net::SocketAddr, path::PathBuf},
    futures::future::join_all,
    tempfile::{tempdir, TempDir},
    tokio::net::TcpListener,
    reqwest::{Client, StatusCode, header},
    serde_json::{json, Value},
    visits_server::{CounterStore, StoreConfig, StoreOpenError, VisitsServer},
};

struct TestServer {
    addr: SocketAddr,
    store: CounterStore,
    client: Client,
}

impl TestServer {
    async fn start(database_path: PathBuf) -> Self {
        let store = CounterStore::open(StoreConfig::new(database_path)).unwrap();
        let server = VisitsServer::with_workers(store.clone(), Some(4)).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });

        Self {
            addr,
            store,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn visit(&self) -> (StatusCode, Value) {
        let response = self.client.get(self.url("/api/visitors")).send().await.unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn reset(&self) -> (StatusCode, Value) {
        let response = self.client.post(self.url("/api/reset")).send().await.unwrap();
        (response.status(), response.json().await.unwrap())
    }
}

async fn fresh_server() -> (TempDir, TestServer) {
    let dir = tempdir().unwrap();
    let server = TestServer::start(dir.path().join("data").join("counter.db")).await;
    (dir, server)
}

#[tokio::test]
async fn visit_visit_reset_visit() {
    let (_dir, server) = fresh_server().await;

    assert_eq!((StatusCode::OK, json!({ "count": 1 })), server.visit().await);
    assert_eq!((StatusCode::OK, json!({ "count": 2 })), server.visit().await);
    assert_eq!((StatusCode::OK, json!({ "count": 0 })), server.reset().await);
    assert_eq!((StatusCode::OK, json!({ "count": 1 })), server.visit().await);
}

#[tokio::test]
async fn reset_twice_returns_zero() {
    let (_dir, server) = fresh_server().await;
    server.visit().await;

    assert_eq!((StatusCode::OK, json!({ "count": 0 })), server.reset().await);
    assert_eq!((StatusCode::OK, json!({ "count": 0 })), server.reset().await);
    assert_eq!(0, server.store.get().unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_visits_are_not_lost() {
    let (_dir, server) = fresh_server().await;
    for _ in 0..5 {
        server.visit().await;
    }

    let requests = 64;
    let responses = join_all((0..requests).map(|_| server.visit())).await;

    let mut counts: Vec<i64> = responses.into_iter()
        .map(|(status, body)| {
            assert_eq!(StatusCode::OK, status);
            body["count"].as_i64().unwrap()
        })
        .collect();
    counts.sort();

    assert_eq!((6..=5 + requests).collect::<Vec<i64>>(), counts);
    assert_eq!(5 + requests, server.store.get().unwrap());
}

#[tokio::test]
async fn count_survives_restart() {
    let dir = tempdir().unwrap();
    let database_path = dir.path().join("counter.db");

    let first = TestServer::start(database_path.clone()).await;
    for _ in 0..3 {
        first.visit().await;
    }

    let restarted = TestServer::start(database_path).await;
    assert_eq!((StatusCode::OK, json!({ "count": 4 })), restarted.visit().await);
}

#[tokio::test]
async fn api_responses_allow_any_origin() {
    let (_dir, server) = fresh_server().await;

    let response = server.client.get(server.url("/api/visitors")).send().await.unwrap();
    assert_eq!("*", response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN]);
    assert_eq!("application/json", response.headers()[header::CONTENT_TYPE]);

    let response = server.client.post(server.url("/api/reset")).send().await.unwrap();
    assert_eq!("*", response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN]);
}

#[tokio::test]
async fn preflight_does_not_count_a_visit() {
    let (_dir, server) = fresh_server().await;

    let response = server.client.request(reqwest::Method::OPTIONS, server.url("/api/visitors"))
        .header(header::ORIGIN, "https://example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .send()
        .await
        .unwrap();

    assert_eq!(StatusCode::NO_CONTENT, response.status());
    assert_eq!("*", response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN]);
    assert_eq!("GET, POST, OPTIONS", response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]);
    assert_eq!(0, server.store.get().unwrap());
}

#[tokio::test]
async fn dashboard_is_served() {
    let (_dir, server) = fresh_server().await;

    let response = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(StatusCode::OK, response.status());
    assert_eq!("text/html; charset=utf-8", response.headers()[header::CONTENT_TYPE]);
    assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    assert!(response.text().await.unwrap().contains("/api/visitors"));

    assert_eq!(0, server.store.get().unwrap());
}

#[tokio::test]
async fn unknown_routes_and_methods() {
    let (_dir, server) = fresh_server().await;

    let response = server.client.get(server.url("/api/unknown")).send().await.unwrap();
    assert_eq!(StatusCode::NOT_FOUND, response.status());
    assert_eq!(json!({ "error": "Not found" }), response.json::<Value>().await.unwrap());

    let response = server.client.post(server.url("/api/visitors")).send().await.unwrap();
    assert_eq!(StatusCode::METHOD_NOT_ALLOWED, response.status());
    assert_eq!("GET, OPTIONS", response.headers()[header::ALLOW]);

    let response = server.client.get(server.url("/api/reset")).send().await.unwrap();
    assert_eq!(StatusCode::METHOD_NOT_ALLOWED, response.status());

    assert_eq!(0, server.store.get().unwrap());
}

#[tokio::test]
async fn storage_failure_returns_generic_error() {
    let (_dir, server) = fresh_server().await;
    assert_eq!((StatusCode::OK, json!({ "count": 1 })), server.visit().await);

    rusqlite::Connection::open(server.store.path()).unwrap()
        .execute("drop table visitors", [])
        .unwrap();

    assert_eq!(
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Unable to read visitor count" })),
        server.visit().await
    );
    assert_eq!(
        (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Unable to reset visitor count" })),
        server.reset().await
    );

    // still serving after failures
    let response = server.client.get(server.url("/")).send().await.unwrap();
    assert_eq!(StatusCode::OK, response.status());

    // a vanished table is not silently recreated
    assert!(matches!(server.store.initialize(), Err(StoreOpenError::Schema(_))));
}
