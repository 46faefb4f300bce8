//! A stand-in for the blob service that records every PUT.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::routing::put;
use axum::Router;
use std::sync::{Arc, Mutex};
use tokio::runtime::Runtime;

#[derive(Debug, Clone)]
pub struct RecordedPut {
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Clone)]
struct StoreState {
    puts: Arc<Mutex<Vec<RecordedPut>>>,
}

async fn record_put(
    State(state): State<StoreState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    state.puts.lock().unwrap().push(RecordedPut {
        path: uri.path().to_string(),
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    });
    StatusCode::CREATED
}

/// Serves on a random local port from its own runtime, so the blocking
/// client under test can be driven from a plain `#[test]`.
pub struct MockBlobStore {
    _runtime: Runtime,
    pub endpoint: String,
    puts: Arc<Mutex<Vec<RecordedPut>>>,
}

#[allow(dead_code)]
impl MockBlobStore {
    pub fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let puts = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/{*path}", put(record_put))
            .with_state(StoreState { puts: puts.clone() });
        let listener = runtime
            .block_on(tokio::net::TcpListener::bind("127.0.0.1:0"))
            .unwrap();
        let endpoint = format!(
            "http://{}/devstoreaccount1",
            listener.local_addr().unwrap()
        );
        runtime.spawn(async move { axum::serve(listener, app).await });

        Self {
            _runtime: runtime,
            endpoint,
            puts,
        }
    }

    pub fn puts(&self) -> Vec<RecordedPut> {
        self.puts.lock().unwrap().clone()
    }

    pub fn put_for(&self, container: &str, blob: &str) -> Option<RecordedPut> {
        let path = format!("/devstoreaccount1/{}/{}", container, blob);
        self.puts().into_iter().find(|put| put.path == path)
    }
}
