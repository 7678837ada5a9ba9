use super::*;

#[derive(Clone)]
pub(super) struct AppState {
    /// Held for the whole of a turn; `try_lock` failing means a turn is running.
    pub(super) session: Arc<tokio::sync::Mutex<SessionController>>,
    pub(super) bridge: SandboxBridge,
    pub(super) turn: watch::Receiver<TurnState>,
}

impl AppState {
    pub(super) fn new(controller: SessionController, bridge: SandboxBridge) -> Self {
        let turn = controller.watch_state();
        Self {
            session: Arc::new(tokio::sync::Mutex::new(controller)),
            bridge,
            turn,
        }
    }
}
