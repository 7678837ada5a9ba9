use super::*;
use crate::host::bridge::ViewControlState;
use crate::host::error::BridgeError;
use tokio::sync::broadcast::error::RecvError;

fn envelope(result: Result<(), BridgeError>) -> Json<ApiResponse<String>> {
    match result {
        Ok(()) => Json(ApiResponse::ok()),
        Err(e) => Json(ApiResponse::err(e.to_string())),
    }
}

pub(super) async fn get_screenshot(State(state): State<AppState>) -> axum::response::Response {
    match state.bridge.capture_screenshot().await {
        Ok(data_url) => Json(ApiResponse::success(ScreenshotResponse { data_url })).into_response(),
        Err(e) => {
            let status = match e {
                BridgeError::ScreenshotBusy => StatusCode::CONFLICT,
                BridgeError::ScreenshotTimeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(ApiResponse::err(e.to_string()))).into_response()
        }
    }
}

pub(super) async fn get_view(State(state): State<AppState>) -> Json<ApiResponse<ViewControlState>> {
    Json(ApiResponse::success(state.bridge.view_state()))
}

pub(super) async fn reset_camera(State(state): State<AppState>) -> Json<ApiResponse<String>> {
    envelope(state.bridge.reset_camera())
}

pub(super) async fn set_auto_rotate(
    State(state): State<AppState>,
    Json(req): Json<ToggleRequest>,
) -> Json<ApiResponse<String>> {
    envelope(state.bridge.set_auto_rotate(req.value))
}

pub(super) async fn set_wireframe(
    State(state): State<AppState>,
    Json(req): Json<ToggleRequest>,
) -> Json<ApiResponse<String>> {
    envelope(state.bridge.set_wireframe(req.value))
}

pub(super) async fn subscribe_events(State(state): State<AppState>) -> impl IntoResponse {
    let mut events = state.bridge.subscribe();
    let stream = async_stream::stream! {
        loop {
            match events.recv().await {
                Ok(ev) => {
                    let payload = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string());
                    let event = SseEvent::default().event("sandbox").data(payload);
                    yield Ok::<SseEvent, Infallible>(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("[promptscene api] Event subscriber lagged, dropped {skipped} events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };
    Sse::new(stream).keep_alive(keep_alive())
}
