//! Fake HTTP endpoint for the attribution backend and collector sinks

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// One received request: Authorization header and JSON body
pub type Received = (Option<String>, Value);

#[derive(Clone)]
struct IngestState {
    status: StatusCode,
    received: Arc<Mutex<Vec<Received>>>,
}

/// Running fake endpoint
pub struct IngestServer {
    pub url: String,
    received: Arc<Mutex<Vec<Received>>>,
}

impl IngestServer {
    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

async fn ingest(
    State(state): State<IngestState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.received.lock().unwrap().push((auth, body));
    let message = if state.status.is_success() { "ok" } else { "ingest down" };
    (state.status, message)
}

/// Serve `POST /ingest` on an ephemeral port, answering with `status`
pub async fn spawn_ingest_server(status: StatusCode) -> IngestServer {
    let received = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/ingest", post(ingest))
        .with_state(IngestState {
            status,
            received: received.clone(),
        });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    IngestServer {
        url: format!("http://{}/ingest", addr),
        received,
    }
}
