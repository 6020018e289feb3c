//! In-process stand-in for a broker management API.
//!
//! An axum router with a single fallback handler serves canned JSON per
//! request path on `127.0.0.1:0` and records every request it receives.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::IntoResponse;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::broker::queue_path;

const NOT_FOUND_BODY: &str = r#"{"error":"Object Not Found","reason":"Not Found"}"#;

/// One request as the fake broker saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    /// Raw request path; percent-encoding is preserved.
    pub path: String,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct Shared {
    routes: HashMap<String, (StatusCode, String)>,
    requests: Vec<RecordedRequest>,
    delay: Duration,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FakeBroker {
    address: SocketAddr,
    shared: SharedState,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl FakeBroker {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let shared = SharedState::default();

        let app = Router::new().fallback(respond).with_state(shared.clone());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Self {
            address,
            shared,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Serve `{messages_ready, message_stats.publish_details.rate}` for
    /// `queue` on the default vhost.
    pub fn set_queue(&self, queue: &str, messages_ready: u64, rate: f64) {
        let body = serde_json::json!({
            "name": queue,
            "vhost": "/",
            "messages_ready": messages_ready,
            "message_stats": { "publish_details": { "rate": rate } },
        });
        self.set_response(&queue_path("/", queue), 200, &body.to_string());
    }

    /// Answer `path` with `status` and `body`. Unknown paths get a 404.
    pub fn set_response(&self, path: &str, status: u16, body: &str) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        lock(&self.shared)
            .routes
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.shared).delay = delay;
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.shared).requests.clone()
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn respond(
    State(shared): State<SharedState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let ((status, body), delay) = {
        let mut shared = lock(&shared);
        let route = shared
            .routes
            .get(&path)
            .cloned()
            .unwrap_or_else(|| (StatusCode::NOT_FOUND, NOT_FOUND_BODY.to_string()));
        shared.requests.push(RecordedRequest {
            method,
            path,
            authorization,
        });
        (route, shared.delay)
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    (status, [(header::CONTENT_TYPE, "application/json")], body)
}
