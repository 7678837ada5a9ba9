use serde_json::{json, Value};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tokio::sync::mpsc;

use super::config::ProviderConfig;
use super::generation::{
    chat_messages, GenerationError, GenerationProvider, GenerationRequest, GenerationStream,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Longest silence tolerated between streamed chunks.
const READ_TIMEOUT: Duration = Duration::from_secs(90);

/// Streams chat completions from any OpenAI-compatible endpoint.
pub struct OpenAiCompatibleProvider {
    config: ProviderConfig,
    agent: ureq::Agent,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self { config, agent }
    }
}

impl GenerationProvider for OpenAiCompatibleProvider {
    fn generate(&self, request: GenerationRequest) -> GenerationStream {
        let (tx, rx) = mpsc::channel(64);
        let config = self.config.clone();
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = stream_completion(&agent, &config, &request, &tx) {
                let _ = tx.blocking_send(Err(e));
            }
        });
        rx
    }

    fn models(&self) -> Vec<String> {
        self.config.models.clone()
    }
}

fn stream_completion(
    agent: &ureq::Agent,
    config: &ProviderConfig,
    request: &GenerationRequest,
    tx: &mpsc::Sender<Result<String, GenerationError>>,
) -> Result<(), GenerationError> {
    let model = request
        .model
        .clone()
        .or_else(|| config.default_model())
        .ok_or_else(|| GenerationError("No model selected".to_string()))?;
    let body = json!({
        "model": model,
        "messages": chat_messages(request),
        "stream": true,
    });

    let response = agent
        .post(&config.completions_url())
        .set("Authorization", &format!("Bearer {}", config.api_key))
        .set("Content-Type", "application/json")
        .set("Accept", "text/event-stream")
        .send_json(body)
        .map_err(|e| match e {
            ureq::Error::Status(code, resp) => {
                let body = resp.into_string().unwrap_or_default();
                GenerationError(format!("HTTP {code}: {}", error_message(&body)))
            }
            ureq::Error::Transport(e) => GenerationError(e.to_string()),
        })?;

    let reader = BufReader::new(response.into_reader());
    for line in reader.lines() {
        let line = line.map_err(|e| GenerationError(format!("Stream interrupted: {e}")))?;
        match parse_sse_line(&line)? {
            SseLine::Delta(text) => {
                if tx.blocking_send(Ok(text)).is_err() {
                    // Nobody is listening any more.
                    return Ok(());
                }
            }
            SseLine::Done => break,
            SseLine::Skip => {}
        }
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Interprets one server-sent event line of a streamed chat completion.
pub(crate) fn parse_sse_line(line: &str) -> Result<SseLine, GenerationError> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    let value: Value = serde_json::from_str(data)
        .map_err(|e| GenerationError(format!("Malformed stream chunk: {e}")))?;
    if value.get("error").is_some() {
        return Err(GenerationError(error_message(data)));
    }
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Ok(SseLine::Delta(text.to_string())),
        _ => Ok(SseLine::Skip),
    }
}

/// Pulls `error.message` out of a provider error body when there is one.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_deltas_are_extracted() {
        let line = r#"data: {"id":"x","choices":[{"index":0,"delta":{"content":"fn render"}}]}"#;
        assert_eq!(
            parse_sse_line(line).expect("parse"),
            SseLine::Delta("fn render".to_string())
        );
    }

    #[test]
    fn role_only_and_comment_lines_are_skipped() {
        let role = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(role).expect("parse"), SseLine::Skip);
        assert_eq!(parse_sse_line(": OPENROUTER PROCESSING").expect("parse"), SseLine::Skip);
        assert_eq!(parse_sse_line("").expect("parse"), SseLine::Skip);
    }

    #[test]
    fn done_marker_ends_the_stream() {
        assert_eq!(parse_sse_line("data: [DONE]").expect("parse"), SseLine::Done);
    }

    #[test]
    fn inline_errors_surface_their_message() {
        let line = r#"data: {"error":{"message":"model overloaded","code":503}}"#;
        let err = parse_sse_line(line).expect_err("error chunk");
        assert_eq!(err.0, "model overloaded");
    }
}
