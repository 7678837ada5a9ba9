use super::*;
use crate::host::session::{TurnOutcome, TurnUpdate};

pub(super) async fn get_state(State(state): State<AppState>) -> Json<ApiResponse<StateResponse>> {
    let turn = *state.turn.borrow();
    let (llm_configured, model, records) = match state.session.try_lock() {
        Ok(session) => (
            session.is_configured(),
            session.model().map(str::to_string),
            Some(session.log().records().len()),
        ),
        // Only a running turn holds the lock, and a turn needs a provider.
        Err(_) => (true, None, None),
    };
    Json(ApiResponse::success(StateResponse {
        turn,
        sandbox_ready: state.bridge.is_ready(),
        llm_configured,
        model,
        records,
        view: state.bridge.view_state(),
    }))
}

/// Streams one turn as SSE. Progress arrives as `state`, `partial` and
/// `skipped` events; the last event is `applied`, `empty` or `failed`.
pub(super) async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> axum::response::Response {
    let Ok(mut session) = state.session.clone().try_lock_owned() else {
        return busy().into_response();
    };

    let (display, mut updates) = tokio::sync::mpsc::unbounded_channel::<TurnUpdate>();
    let turn = tokio::spawn(async move {
        if let Some(model) = req.model.as_deref() {
            session.select_model(model)?;
        }
        session.submit(&req.prompt, &display).await
    });

    let stream = async_stream::stream! {
        while let Some(update) = updates.recv().await {
            let name = match &update {
                TurnUpdate::State { .. } => "state",
                TurnUpdate::Partial { .. } => "partial",
                TurnUpdate::ScreenshotSkipped { .. } => "skipped",
            };
            let payload = serde_json::to_string(&update).unwrap_or_else(|_| "{}".to_string());
            yield Ok::<SseEvent, Infallible>(SseEvent::default().event(name).data(payload));
        }

        let (name, payload) = match turn.await {
            Ok(Ok(TurnOutcome::Applied { code, screenshot_attached })) => (
                "applied",
                serde_json::json!({ "code": code, "screenshot_attached": screenshot_attached }),
            ),
            Ok(Ok(TurnOutcome::Empty)) => (
                "empty",
                serde_json::json!({ "message": "No code generated" }),
            ),
            Ok(Err(e)) => ("failed", serde_json::json!({ "message": e.to_string() })),
            Err(e) => ("failed", serde_json::json!({ "message": format!("Turn aborted: {e}") })),
        };
        yield Ok(SseEvent::default().event(name).data(payload.to_string()));
    };
    Sse::new(stream).keep_alive(keep_alive()).into_response()
}

pub(super) async fn get_code(State(state): State<AppState>) -> axum::response::Response {
    match state.session.try_lock() {
        Ok(session) => Json(ApiResponse::success(CodeResponse {
            code: session.current_code().to_string(),
        }))
        .into_response(),
        Err(_) => busy().into_response(),
    }
}

pub(super) async fn export_session(State(state): State<AppState>) -> axum::response::Response {
    match state.session.try_lock() {
        Ok(session) => Json(ApiResponse::success(session.export())).into_response(),
        Err(_) => busy().into_response(),
    }
}

/// Takes the raw document so malformed files get the session error message.
pub(super) async fn import_session(
    State(state): State<AppState>,
    body: String,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let Ok(mut session) = state.session.try_lock() else {
        return busy();
    };
    match session.import_json(&body) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok())),
        Err(e) => (StatusCode::BAD_REQUEST, Json(ApiResponse::err(e.to_string()))),
    }
}
