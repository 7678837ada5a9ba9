use std::fmt;

/// Why a screenshot or a send through the bridge did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    ScreenshotTimeout,
    ScreenshotFailed(String),
    ScreenshotBusy,
    Disconnected,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::ScreenshotTimeout => f.write_str("Screenshot timeout"),
            BridgeError::ScreenshotFailed(message) => f.write_str(message),
            BridgeError::ScreenshotBusy => f.write_str("A screenshot is already being captured"),
            BridgeError::Disconnected => f.write_str("Sandbox is not connected"),
        }
    }
}

impl std::error::Error for BridgeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationError(pub String);

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for GenerationError {}

/// Reasons a turn ends without applying code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    Configuration(String),
    EmptyPrompt,
    Busy,
    Generation(String),
    InvalidSession(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Configuration(message) => write!(f, "LLM not configured: {message}"),
            SessionError::EmptyPrompt => f.write_str("Please enter a prompt"),
            SessionError::Busy => f.write_str("A turn is already in progress"),
            SessionError::Generation(message) => write!(f, "Generation failed: {message}"),
            SessionError::InvalidSession(message) => write!(f, "Invalid session file: {message}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<GenerationError> for SessionError {
    fn from(value: GenerationError) -> Self {
        SessionError::Generation(value.0)
    }
}
