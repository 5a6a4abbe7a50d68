//! HTTP surface: the per-session relay endpoint and the control endpoint.

mod control;
mod relay;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::engine::Engine;
use crate::monitor::ProcessInspector;
use crate::state::Hub;

/// Capacity of the per-connection writer channels. Registry sends park here
/// instead of blocking on a slow browser.
pub(crate) const OUTBOUND_BUFFER: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub engine: Engine,
    pub inspector: Arc<dyn ProcessInspector>,
    /// Whether a library watcher is running. When it is not, freshly opened
    /// control channels are told to poll for processes themselves.
    pub watcher_available: bool,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/websocket/{uuid}", get(relay::ws_handler))
        .route("/status", get(control::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
