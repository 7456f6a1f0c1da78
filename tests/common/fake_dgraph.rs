//! Fake Dgraph admin endpoint
//!
//! Answers the `export` mutation with a configurable outcome and records
//! how many calls it received and how many overlapped.

use super::constants::EXPORTED_FILES;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// How the fake answers every export call
#[derive(Clone, Debug)]
pub enum FakeBehavior {
    Success,
    Reject { code: String, message: String },
    HttpStatus(u16),
}

struct FakeState {
    behavior: FakeBehavior,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    last_request: Mutex<Option<Value>>,
}

pub struct FakeDgraph {
    pub admin_url: String,
    state: Arc<FakeState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

async fn admin(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> impl IntoResponse {
    state.calls.fetch_add(1, Ordering::SeqCst);
    let now_active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_active.fetch_max(now_active, Ordering::SeqCst);
    *state.last_request.lock().unwrap() = Some(body);

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    state.active.fetch_sub(1, Ordering::SeqCst);

    match &state.behavior {
        FakeBehavior::Success => (
            StatusCode::OK,
            Json(json!({
                "data": {"export": {
                    "response": {"message": "Export completed.", "code": "Success"},
                    "exportedFiles": EXPORTED_FILES,
                }}
            })),
        )
            .into_response(),
        FakeBehavior::Reject { code, message } => (
            StatusCode::OK,
            Json(json!({
                "data": {"export": {
                    "response": {"message": message, "code": code},
                    "exportedFiles": null,
                }}
            })),
        )
            .into_response(),
        FakeBehavior::HttpStatus(status) => (
            StatusCode::from_u16(*status).unwrap(),
            "admin endpoint unavailable",
        )
            .into_response(),
    }
}

impl FakeDgraph {
    pub async fn spawn(behavior: FakeBehavior) -> Self {
        Self::spawn_with_delay(behavior, Duration::ZERO).await
    }

    pub async fn spawn_with_delay(behavior: FakeBehavior, delay: Duration) -> Self {
        let state = Arc::new(FakeState {
            behavior,
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        });

        let app = Router::new()
            .route("/admin", post(admin))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake admin endpoint");
        let port = listener.local_addr().unwrap().port();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake admin endpoint failed");
        });

        Self {
            admin_url: format!("http://127.0.0.1:{}/admin", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<Value> {
        self.state.last_request.lock().unwrap().clone()
    }
}
