use super::*;
use crate::host::config::{ProviderConfig, PREFERRED_MODEL, SUGGESTED_BASE_URLS};

pub(super) async fn get_llm(State(state): State<AppState>) -> axum::response::Response {
    let Ok(session) = state.session.try_lock() else {
        return busy().into_response();
    };
    Json(ApiResponse::success(LlmInfo {
        configured: session.is_configured(),
        base_url: session.provider_config().map(|c| c.base_url.clone()),
        models: session.models().to_vec(),
        current_model: session.model().map(str::to_string),
        suggested_base_urls: SUGGESTED_BASE_URLS.to_vec(),
    }))
    .into_response()
}

pub(super) async fn set_llm_config(
    State(state): State<AppState>,
    Json(req): Json<LlmConfigRequest>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let base_url = req.base_url.trim().to_string();
    let api_key = req.api_key.trim().to_string();
    if base_url.is_empty() || api_key.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::err("base_url and api_key are required")),
        );
    }
    let mut models: Vec<String> = req
        .models
        .iter()
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect();
    if models.is_empty() {
        models.push(PREFERRED_MODEL.to_string());
    }

    let Ok(mut session) = state.session.try_lock() else {
        return busy();
    };
    session.configure(ProviderConfig {
        base_url,
        api_key,
        models,
    });
    (StatusCode::OK, Json(ApiResponse::ok()))
}

pub(super) async fn set_llm_model(
    State(state): State<AppState>,
    Json(req): Json<ModelRequest>,
) -> (StatusCode, Json<ApiResponse<String>>) {
    let Ok(mut session) = state.session.try_lock() else {
        return busy();
    };
    match session.select_model(&req.model) {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::ok())),
        Err(e) => (StatusCode::BAD_REQUEST, Json(ApiResponse::err(e.to_string()))),
    }
}
