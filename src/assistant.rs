use std::future::Future;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{AssistantConfig, AssistantKind};
use crate::error::{Error, Result};
use crate::process::{ProcessConfig, spawn_and_stream};

pub const DEFAULT_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:7b-instruct";
pub const DEFAULT_NUM_CTX: u32 = 4096;
pub const DEFAULT_NUM_PREDICT: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.15;

const SYSTEM_PROMPT: &str = "You are a coding assistant that repairs source files. \
Use only the provided context. Answer with a unified diff and nothing else.";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

/// Turns a prompt into free text that is expected to contain a diff.
pub trait Assistant {
    fn complete(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOptions {
    pub num_ctx: u32,
    pub num_predict: u32,
    pub temperature: f32,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            num_ctx: DEFAULT_NUM_CTX,
            num_predict: DEFAULT_NUM_PREDICT,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// Non-streaming chat endpoint (`POST <url>/api/chat`).
#[derive(Debug, Clone)]
pub struct ChatAssistant {
    url: String,
    model: String,
    options: ChatOptions,
    timeout: Option<Duration>,
}

impl ChatAssistant {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            options: ChatOptions::default(),
            timeout: None,
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/chat", self.url.trim_end_matches('/'))
    }

    pub fn request_body(&self, prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "options": {
                "num_ctx": self.options.num_ctx,
                "num_predict": self.options.num_predict,
                "temperature": self.options.temperature,
            },
        })
    }
}

impl Assistant for ChatAssistant {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let endpoint = self.endpoint();
        let body = self.request_body(prompt);
        let timeout = self.timeout;
        debug!(endpoint = %endpoint, model = %self.model, "sending chat request");

        let json = tokio::task::spawn_blocking(move || post_json(&endpoint, &body, timeout))
            .await
            .map_err(|e| Error::Assistant(format!("chat request task failed: {e}")))??;
        parse_chat_response(&json)
    }
}

fn post_json(
    endpoint: &str,
    body: &serde_json::Value,
    timeout: Option<Duration>,
) -> Result<serde_json::Value> {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    let agent = builder.build();

    let mut backoff_ms = INITIAL_BACKOFF_MS;
    let mut attempt = 1;
    loop {
        match agent
            .post(endpoint)
            .set("Content-Type", "application/json")
            .send_json(body)
        {
            Ok(response) => {
                return response
                    .into_json()
                    .map_err(|e| Error::Assistant(format!("failed to parse chat response: {e}")));
            }
            Err(ref e) if attempt < MAX_RETRIES && is_retryable(e) => {
                warn!(attempt, error = %e, backoff_ms, "retrying chat request after transient error");
                thread::sleep(Duration::from_millis(backoff_ms));
                backoff_ms *= 2;
                attempt += 1;
            }
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(Error::Assistant(format!("HTTP {code}: {}", text.trim())));
            }
            Err(e) => {
                return Err(Error::Assistant(format!("chat request failed: {e}")));
            }
        }
    }
}

fn is_retryable(err: &ureq::Error) -> bool {
    match err {
        ureq::Error::Status(code, _) => *code == 429 || *code >= 500,
        ureq::Error::Transport(_) => true,
    }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
}

/// Pull `message.content` out of a chat response. Blank content is an error.
pub fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    if let Some(err) = json.get("error").and_then(|e| e.as_str()) {
        return Err(Error::Assistant(format!("assistant returned error: {err}")));
    }
    let response: ChatResponse = serde_json::from_value(json.clone())
        .map_err(|e| Error::Assistant(format!("unexpected chat response: {e}")))?;
    let content = response.message.map(|m| m.content).unwrap_or_default();
    if content.trim().is_empty() {
        return Err(Error::Assistant("empty response".to_string()));
    }
    Ok(content)
}

/// External program that reads the prompt on stdin and prints its answer.
#[derive(Debug, Clone)]
pub struct CommandAssistant {
    binary: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Option<Duration>,
}

impl CommandAssistant {
    pub fn new(binary: impl Into<String>, args: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args,
            working_dir: working_dir.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Assistant for CommandAssistant {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let config = ProcessConfig {
            command: self.binary.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            timeout: self.timeout,
            log_prefix: "assistant".to_string(),
            env: vec![],
            stdin_data: Some(prompt.to_string()),
        };
        let output = spawn_and_stream(config)
            .await
            .map_err(|e| Error::Assistant(e.to_string()))?;
        if output.signal == Some(libc::SIGINT) {
            return Err(Error::Interrupted);
        }
        if !output.success() {
            return Err(Error::Assistant(format!(
                "{} exited with code {}: {}",
                self.binary,
                output.exit_code,
                output.diagnostic().lines().next().unwrap_or_default()
            )));
        }
        let text = output.stdout();
        if text.trim().is_empty() {
            return Err(Error::Assistant("empty response".to_string()));
        }
        Ok(format!("{text}\n"))
    }
}

/// Enum dispatch over the supported backends.
pub enum AnyAssistant {
    Chat(ChatAssistant),
    Command(CommandAssistant),
}

impl AnyAssistant {
    /// Build the configured backend. Command assistants run in `working_dir`.
    pub fn from_config(config: &AssistantConfig, working_dir: &Path) -> Result<Self> {
        match config.kind {
            AssistantKind::Http => Ok(AnyAssistant::Chat(
                ChatAssistant::new(&config.url, &config.model)
                    .with_options(ChatOptions {
                        num_ctx: config.num_ctx,
                        num_predict: config.num_predict,
                        temperature: config.temperature,
                    })
                    .with_timeout(config.timeout),
            )),
            AssistantKind::Command => {
                let binary = config.binary.clone().ok_or_else(|| {
                    Error::Config("assistant.binary is required for a command assistant".to_string())
                })?;
                Ok(AnyAssistant::Command(
                    CommandAssistant::new(binary, config.args.clone(), working_dir)
                        .with_timeout(config.timeout),
                ))
            }
        }
    }
}

impl Assistant for AnyAssistant {
    async fn complete(&self, prompt: &str) -> Result<String> {
        match self {
            AnyAssistant::Chat(a) => a.complete(prompt).await,
            AnyAssistant::Command(a) => a.complete(prompt).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let a = ChatAssistant::new("http://localhost:11434/", DEFAULT_MODEL);
        assert_eq!(a.endpoint(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_request_body_shape() {
        let a = ChatAssistant::new(DEFAULT_URL, "m1").with_options(ChatOptions {
            num_ctx: 8192,
            num_predict: 256,
            temperature: 0.0,
        });
        let body = a.request_body("fix it");
        assert_eq!(body["model"], "m1");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "fix it");
        assert_eq!(body["options"]["num_ctx"], 8192);
        assert_eq!(body["options"]["num_predict"], 256);
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "model": "m",
            "message": { "role": "assistant", "content": "--- a/x\n+++ b/x\n" },
            "done": true
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "--- a/x\n+++ b/x\n");
    }

    #[test]
    fn test_parse_empty_or_error_response() {
        let empty = serde_json::json!({ "message": { "role": "assistant", "content": "  " } });
        assert!(matches!(parse_chat_response(&empty), Err(Error::Assistant(_))));

        let missing = serde_json::json!({ "done": true });
        assert!(matches!(parse_chat_response(&missing), Err(Error::Assistant(_))));

        let err = serde_json::json!({ "error": "model not found" });
        let msg = parse_chat_response(&err).unwrap_err().to_string();
        assert!(msg.contains("model not found"));
    }

    #[test]
    fn test_from_config_selects_backend() {
        let mut config = AssistantConfig {
            kind: AssistantKind::Http,
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            num_ctx: DEFAULT_NUM_CTX,
            num_predict: DEFAULT_NUM_PREDICT,
            temperature: DEFAULT_TEMPERATURE,
            timeout: None,
            binary: None,
            args: vec![],
        };
        let dir = Path::new(".");
        assert!(matches!(
            AnyAssistant::from_config(&config, dir).unwrap(),
            AnyAssistant::Chat(_)
        ));

        config.kind = AssistantKind::Command;
        assert!(matches!(
            AnyAssistant::from_config(&config, dir),
            Err(Error::Config(_))
        ));
        config.binary = Some("llm".to_string());
        assert!(matches!(
            AnyAssistant::from_config(&config, dir).unwrap(),
            AnyAssistant::Command(_)
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_assistant_reads_stdin() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = CommandAssistant::new("cat", vec![], dir.path());
        let out = a.complete("--- a/x\n+++ b/x").await.unwrap();
        assert_eq!(out, "--- a/x\n+++ b/x\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_assistant_failure_is_assistant_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let a = CommandAssistant::new("false", vec![], dir.path());
        let err = a.complete("x").await.unwrap_err();
        assert!(matches!(err, Error::Assistant(_)));
        assert!(err.is_recoverable());
    }
}
