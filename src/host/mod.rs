pub mod bridge;
pub mod config;
pub mod error;
pub mod generation;
pub mod openai;
pub mod session;

use bevy::prelude::*;

use crate::api;
use crate::protocol::{self, HostEndpoint};
use crate::sandbox::SandboxChannels;
use bridge::SandboxBridge;
use config::HostSettings;
use session::SessionController;

/// Connects the sandbox to a host runtime on its own thread: the bridge, the
/// session controller and the control API.
pub struct HostPlugin;

impl Plugin for HostPlugin {
    fn build(&self, app: &mut App) {
        let (host, sandbox) = protocol::boundary();
        app.insert_resource(SandboxChannels::new(sandbox));

        let settings = HostSettings::from_env();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    error!("[promptscene host] Failed to start runtime: {e}");
                    return;
                }
            };
            rt.block_on(run_host(host, settings));
        });
    }
}

pub async fn run_host(endpoint: HostEndpoint, settings: HostSettings) {
    let HostEndpoint { outbound, inbound } = endpoint;
    let bridge = SandboxBridge::new(outbound);
    bridge.spawn_pump(inbound);

    let mut controller = SessionController::new(bridge.clone());
    match settings.provider.clone() {
        Some(provider) => controller.configure(provider),
        None => info!(
            "[promptscene host] No LLM configured; set PROMPTSCENE_LLM_BASE_URL and \
             PROMPTSCENE_LLM_API_KEY or POST /llm/config"
        ),
    }
    if let Some(model) = settings.model_override.as_deref() {
        if let Err(e) = controller.select_model(model) {
            warn!("[promptscene host] Ignoring PROMPTSCENE_LLM_MODEL: {e}");
        }
    }

    if let Err(e) = api::serve(controller, bridge, &settings.api_addr).await {
        error!("[promptscene api] {e}");
    }
}
