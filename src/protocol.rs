//! Messages exchanged between the host runtime and the sandboxed viewport.
//!
//! Only JSON text crosses the boundary. Each side decodes into its own typed
//! enum and dispatches exhaustively on it.

use serde::{Deserialize, Serialize};

/// Correlates a request with its terminal reply. Absent on the wire when unset.
pub type RequestId = u64;

/// Host → sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    RunCode {
        #[serde(default)]
        code: String,
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<RequestId>,
    },
    GetScreenshot {
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<RequestId>,
    },
    ResetCamera,
    ToggleAutoRotate {
        value: bool,
    },
    ToggleWireframe {
        value: bool,
    },
}

/// Sandbox → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxMessage {
    Ready,
    Done {
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<RequestId>,
    },
    Error {
        message: String,
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<RequestId>,
    },
    Screenshot {
        #[serde(rename = "dataUrl")]
        data_url: String,
        #[serde(
            rename = "requestId",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        request_id: Option<RequestId>,
    },
}

impl HostMessage {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn decode(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Invalid host message: {e}"))
    }
}

impl SandboxMessage {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn decode(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Invalid sandbox message: {e}"))
    }
}

/// Host half of the boundary.
pub struct HostEndpoint {
    pub outbound: crossbeam_channel::Sender<String>,
    pub inbound: tokio::sync::mpsc::UnboundedReceiver<String>,
}

/// Sandbox half of the boundary.
pub struct SandboxEndpoint {
    pub inbound: crossbeam_channel::Receiver<String>,
    pub outbound: tokio::sync::mpsc::UnboundedSender<String>,
}

/// Creates both halves. Host → sandbox is a crossbeam channel so the bevy side
/// can drain it without an async runtime; the return path is a tokio channel
/// the host pump awaits on.
pub fn boundary() -> (HostEndpoint, SandboxEndpoint) {
    let (to_sandbox, from_host) = crossbeam_channel::unbounded::<String>();
    let (to_host, from_sandbox) = tokio::sync::mpsc::unbounded_channel::<String>();
    (
        HostEndpoint {
            outbound: to_sandbox,
            inbound: from_sandbox,
        },
        SandboxEndpoint {
            inbound: from_host,
            outbound: to_host,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_messages_use_wire_names() {
        let run = HostMessage::RunCode {
            code: "fn render_scene(env) {}".into(),
            request_id: None,
        };
        let json: serde_json::Value = serde_json::from_str(&run.encode()).expect("json");
        assert_eq!(json["type"], "RUN_CODE");
        assert_eq!(json["code"], "fn render_scene(env) {}");
        assert!(json.get("requestId").is_none());

        let toggle = HostMessage::ToggleAutoRotate { value: true };
        assert_eq!(
            toggle.encode(),
            r#"{"type":"TOGGLE_AUTO_ROTATE","value":true}"#
        );
        assert_eq!(HostMessage::ResetCamera.encode(), r#"{"type":"RESET_CAMERA"}"#);
    }

    #[test]
    fn bare_requests_decode_without_correlation() {
        let shot = HostMessage::decode(r#"{"type":"GET_SCREENSHOT"}"#).expect("decode");
        assert_eq!(shot, HostMessage::GetScreenshot { request_id: None });

        let run = HostMessage::decode(r#"{"type":"RUN_CODE"}"#).expect("decode");
        assert_eq!(
            run,
            HostMessage::RunCode {
                code: String::new(),
                request_id: None
            }
        );
    }

    #[test]
    fn sandbox_replies_carry_optional_request_id() {
        let shot = SandboxMessage::Screenshot {
            data_url: "data:image/png;base64,AAAA".into(),
            request_id: Some(7),
        };
        let json: serde_json::Value = serde_json::from_str(&shot.encode()).expect("json");
        assert_eq!(json["type"], "SCREENSHOT");
        assert_eq!(json["dataUrl"], "data:image/png;base64,AAAA");
        assert_eq!(json["requestId"], 7);

        let err = SandboxMessage::decode(r#"{"type":"ERROR","message":"boom"}"#).expect("decode");
        assert_eq!(
            err,
            SandboxMessage::Error {
                message: "boom".into(),
                request_id: None
            }
        );
        assert_eq!(SandboxMessage::Ready.encode(), r#"{"type":"READY"}"#);
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        assert!(HostMessage::decode(r#"{"type":"LAUNCH_MISSILES"}"#).is_err());
        assert!(SandboxMessage::decode("not json").is_err());
    }
}
