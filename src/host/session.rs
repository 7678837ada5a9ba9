use bevy::log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use super::bridge::SandboxBridge;
use super::config::ProviderConfig;
use super::error::SessionError;
use super::generation::{
    strip_fences, GenerationProvider, GenerationRequest, GenerationStream, SYSTEM_PROMPT,
};
use super::openai::OpenAiCompatibleProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub prompt: String,
    pub code: String,
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub timestamp: u64,
}

/// Export format. Missing fields import as empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(default)]
    pub session: Vec<SessionRecord>,
    #[serde(rename = "currentCode", default)]
    pub current_code: String,
    #[serde(default)]
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionLog {
    records: Vec<SessionRecord>,
    current_code: String,
}

impl SessionLog {
    pub fn append(&mut self, record: SessionRecord) {
        self.current_code = record.code.clone();
        self.records.push(record);
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn current_code(&self) -> &str {
        &self.current_code
    }

    pub fn export(&self, timestamp: u64) -> SessionDocument {
        SessionDocument {
            session: self.records.clone(),
            current_code: self.current_code.clone(),
            timestamp,
        }
    }

    pub fn restore(&mut self, document: SessionDocument) {
        self.records = document.session;
        self.current_code = document.current_code;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Idle,
    AwaitingScreenshot,
    AwaitingGeneration,
    Applying,
    Failed,
}

/// Progress of a turn, for whoever is displaying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnUpdate {
    State { state: TurnState },
    Partial { code: String },
    ScreenshotSkipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Applied {
        code: String,
        screenshot_attached: bool,
    },
    /// The provider finished without usable code. Nothing was sent.
    Empty,
}

pub fn unix_ms_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Runs one prompt → screenshot → generation → apply turn at a time and owns
/// the session log.
pub struct SessionController {
    bridge: SandboxBridge,
    provider: Option<Arc<dyn GenerationProvider>>,
    provider_config: Option<ProviderConfig>,
    models: Vec<String>,
    model: Option<String>,
    log: SessionLog,
    state: watch::Sender<TurnState>,
}

impl SessionController {
    pub fn new(bridge: SandboxBridge) -> Self {
        let (state, _) = watch::channel(TurnState::Idle);
        Self {
            bridge,
            provider: None,
            provider_config: None,
            models: Vec::new(),
            model: None,
            log: SessionLog::default(),
            state,
        }
    }

    /// Switches to an OpenAI-compatible endpoint and selects its default model.
    pub fn configure(&mut self, config: ProviderConfig) {
        self.model = config.default_model();
        self.models = config.models.clone();
        self.provider = Some(Arc::new(OpenAiCompatibleProvider::new(config.clone())));
        self.provider_config = Some(config);
        info!(
            "[promptscene host] LLM configured ({} models, using {:?})",
            self.models.len(),
            self.model
        );
    }

    pub fn set_provider(&mut self, provider: Arc<dyn GenerationProvider>, model: Option<String>) {
        self.models = provider.models();
        self.provider = Some(provider);
        self.provider_config = None;
        self.model = model;
    }

    pub fn select_model(&mut self, model: &str) -> Result<(), SessionError> {
        let model = model.trim();
        if model.is_empty() {
            return Err(SessionError::Configuration("model name is empty".to_string()));
        }
        self.model = Some(model.to_string());
        Ok(())
    }

    pub fn provider_config(&self) -> Option<&ProviderConfig> {
        self.provider_config.as_ref()
    }

    pub fn is_configured(&self) -> bool {
        self.provider.is_some()
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn current_code(&self) -> &str {
        self.log.current_code()
    }

    pub fn state(&self) -> TurnState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TurnState> {
        self.state.subscribe()
    }

    fn enter(&self, state: TurnState, display: &mpsc::UnboundedSender<TurnUpdate>) {
        self.state.send_replace(state);
        let _ = display.send(TurnUpdate::State { state });
    }

    fn fail(
        &self,
        display: &mpsc::UnboundedSender<TurnUpdate>,
        error: SessionError,
    ) -> SessionError {
        warn!("[promptscene host] Turn failed: {error}");
        self.enter(TurnState::Failed, display);
        self.enter(TurnState::Idle, display);
        error
    }

    /// Runs one turn. Returns once the code is sent; the sandbox outcome
    /// arrives later as a bridge event.
    pub async fn submit(
        &mut self,
        prompt: &str,
        display: &mpsc::UnboundedSender<TurnUpdate>,
    ) -> Result<TurnOutcome, SessionError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(self.fail(display, SessionError::EmptyPrompt));
        }
        let Some(provider) = self.provider.clone() else {
            return Err(self.fail(
                display,
                SessionError::Configuration("configure a provider first".to_string()),
            ));
        };

        let prior_code = Some(self.log.current_code().to_string()).filter(|c| !c.is_empty());
        let screenshot = if prior_code.is_some() {
            self.enter(TurnState::AwaitingScreenshot, display);
            match self.bridge.capture_screenshot().await {
                Ok(data_url) => Some(data_url),
                Err(e) => {
                    warn!("[promptscene host] Failed to capture screenshot: {e}");
                    let _ = display.send(TurnUpdate::ScreenshotSkipped {
                        reason: e.to_string(),
                    });
                    None
                }
            }
        } else {
            None
        };

        self.enter(TurnState::AwaitingGeneration, display);
        let request = GenerationRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: prompt.to_string(),
            prior_code,
            screenshot: screenshot.clone(),
            model: self.model.clone(),
        };
        let code = match collect_code(provider.generate(request), display).await {
            Ok(code) => code,
            Err(e) => return Err(self.fail(display, e.into())),
        };
        if code.is_empty() {
            warn!("[promptscene host] No code generated");
            self.enter(TurnState::Failed, display);
            self.enter(TurnState::Idle, display);
            return Ok(TurnOutcome::Empty);
        }

        self.enter(TurnState::Applying, display);
        self.bridge.run(code.clone());
        let screenshot_attached = screenshot.is_some();
        self.log.append(SessionRecord {
            prompt: prompt.to_string(),
            code: code.clone(),
            screenshot,
            timestamp: unix_ms_now(),
        });
        self.enter(TurnState::Idle, display);
        Ok(TurnOutcome::Applied {
            code,
            screenshot_attached,
        })
    }

    pub fn export(&self) -> SessionDocument {
        self.log.export(unix_ms_now())
    }

    /// Replaces the log wholesale and re-runs the restored code, if any.
    pub fn import(&mut self, document: SessionDocument) {
        self.log.restore(document);
        let code = self.log.current_code().to_string();
        if !code.is_empty() {
            self.bridge.run(code);
        }
        info!(
            "[promptscene host] Session loaded ({} records)",
            self.log.records().len()
        );
    }

    pub fn import_json(&mut self, text: &str) -> Result<(), SessionError> {
        let document = serde_json::from_str::<SessionDocument>(text)
            .map_err(|e| SessionError::InvalidSession(e.to_string()))?;
        self.import(document);
        Ok(())
    }
}

/// Accumulates deltas, mirroring the fence-stripped text so far to the display.
async fn collect_code(
    mut stream: GenerationStream,
    display: &mpsc::UnboundedSender<TurnUpdate>,
) -> Result<String, super::error::GenerationError> {
    let mut full = String::new();
    while let Some(chunk) = stream.recv().await {
        full.push_str(&chunk?);
        let _ = display.send(TurnUpdate::Partial {
            code: strip_fences(&full),
        });
    }
    Ok(strip_fences(&full))
}
