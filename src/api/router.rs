use super::*;

pub(super) fn build_router(state: AppState, security: ApiSecurity) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/generate", post(generate))
        .route("/code", get(get_code))
        .route("/session/export", get(export_session))
        .route("/session/import", post(import_session))
        .route("/screenshot", get(get_screenshot))
        .route("/view", get(get_view))
        .route("/view/reset_camera", post(reset_camera))
        .route("/view/auto_rotate", post(set_auto_rotate))
        .route("/view/wireframe", post(set_wireframe))
        .route("/events/subscribe", get(subscribe_events))
        .route("/llm", get(get_llm))
        .route("/llm/config", post(set_llm_config))
        .route("/llm/model", post(set_llm_model))
        .with_state(state)
        .layer(middleware::from_fn_with_state(security, api_guard))
}
