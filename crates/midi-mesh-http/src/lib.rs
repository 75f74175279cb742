//! Read-only JSON views + the handshake endpoint (spec.md §4.16, §6).

pub mod handshake;
pub mod state;
pub mod views;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

pub use state::AppState;

/// Request-logging middleware: one tracing event per request with method,
/// path, status, and duration. Grounded in the teacher's
/// `count_api_requests`, minus its traffic-counter bookkeeping — there is
/// no dashboard here to feed.
async fn log_requests(State(_state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let start = std::time::Instant::now();
    let resp = next.run(req).await;
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    info!(method = %method, path = %path, status = resp.status().as_u16(), duration_ms, "request");
    resp
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(views::health))
        .route("/node/info", get(views::node_info))
        .route("/midi/devices", get(views::midi_devices))
        .route("/network/mesh", get(views::network_mesh))
        .route("/network/stats", get(views::network_stats))
        .route("/network/handshake", post(handshake::handshake))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}
