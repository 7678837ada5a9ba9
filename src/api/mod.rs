mod router;
mod routes_llm;
mod routes_session;
mod routes_view;
mod security;
mod state;
pub mod types;

use axum::{
    extract::Request,
    extract::State,
    http::StatusCode,
    middleware::{self, Next},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use bevy::log::{info, warn};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::host::bridge::SandboxBridge;
use crate::host::error::SessionError;
use crate::host::session::{SessionController, TurnState};
use router::build_router;
use routes_llm::*;
use routes_session::*;
use routes_view::*;
use security::*;
use state::*;
use types::*;

fn keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(std::time::Duration::from_secs(5))
        .text("keep-alive")
}

fn busy() -> (StatusCode, Json<ApiResponse<String>>) {
    (
        StatusCode::CONFLICT,
        Json(ApiResponse::err(SessionError::Busy.to_string())),
    )
}

/// Binds the control API and serves it until the listener fails.
pub async fn serve(
    controller: SessionController,
    bridge: SandboxBridge,
    addr: &str,
) -> Result<(), String> {
    let state = AppState::new(controller, bridge);
    let security = ApiSecurity::from_env();
    let app = build_router(state, security);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {addr}: {e}"))?;
    println!("[promptscene api] Listening on http://{addr}");
    info!("[promptscene api] Control API ready");

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("Server stopped: {e}"))
}
