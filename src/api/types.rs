use serde::{Deserialize, Serialize};

use crate::host::bridge::ViewControlState;
use crate::host::session::TurnState;

#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn ok() -> ApiResponse<String> {
        ApiResponse {
            ok: true,
            data: Some("ok".to_string()),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> ApiResponse<String> {
        ApiResponse {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Serialize)]
pub struct StateResponse {
    pub turn: TurnState,
    pub sandbox_ready: bool,
    pub llm_configured: bool,
    pub model: Option<String>,
    /// `None` while a turn holds the session.
    pub records: Option<usize>,
    pub view: ViewControlState,
}

#[derive(Serialize, Deserialize)]
pub struct CodeResponse {
    pub code: String,
}

#[derive(Serialize)]
pub struct ScreenshotResponse {
    #[serde(rename = "dataUrl")]
    pub data_url: String,
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Deserialize)]
pub struct ToggleRequest {
    pub value: bool,
}

#[derive(Deserialize)]
pub struct LlmConfigRequest {
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub models: Vec<String>,
}

#[derive(Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

#[derive(Serialize)]
pub struct LlmInfo {
    pub configured: bool,
    pub base_url: Option<String>,
    pub models: Vec<String>,
    pub current_model: Option<String>,
    pub suggested_base_urls: Vec<&'static str>,
}
