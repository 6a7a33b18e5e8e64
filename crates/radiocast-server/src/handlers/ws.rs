//! WebSocket upgrade handler

use crate::session;
use crate::state::AppState;
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::Arc;

/// Upgrade the request and hand the socket to a session task
pub async fn websocket(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| session::run_session(socket, state, addr))
}
