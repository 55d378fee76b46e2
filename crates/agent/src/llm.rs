//! Language model access.
//!
//! [`CompletionClient`] is the seam the orchestrator depends on.
//! [`OpenAiCompatClient`] talks to any `/chat/completions` endpoint (OpenAI,
//! Ollama) over `reqwest`, with a per-call timeout and bounded retries for
//! transient failures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use instaquote_core::config::{LlmConfig, LlmProvider};
use instaquote_core::domain::chat::Turn;
use instaquote_core::errors::ApplicationError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(4);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompletionPurpose {
    QuoteReply,
    NameInference,
    Summary,
}

impl CompletionPurpose {
    pub fn temperature(self) -> f32 {
        match self {
            Self::QuoteReply => 0.7,
            Self::NameInference => 0.0,
            Self::Summary => 0.5,
        }
    }

    pub fn max_tokens(self) -> u32 {
        match self {
            Self::QuoteReply => 500,
            Self::NameInference => 50,
            Self::Summary => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::QuoteReply => "quote_reply",
            Self::NameInference => "name_inference",
            Self::Summary => "summary",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub purpose: CompletionPurpose,
    pub system_prompt: String,
    pub messages: Vec<Turn>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("provider rejected credentials")]
    AuthenticationFailed,
    #[error("provider rate limited the request")]
    RateLimited,
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed completion body: {0}")]
    Malformed(String),
    #[error("provider returned an empty completion")]
    EmptyCompletion,
    #[error("completion client setup failed: {0}")]
    Setup(String),
}

impl LlmError {
    /// Timeouts, transport errors, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::RateLimited => true,
            Self::Status { status, .. } => *status >= 500,
            Self::AuthenticationFailed
            | Self::Malformed(_)
            | Self::EmptyCompletion
            | Self::Setup(_) => false,
        }
    }
}

impl From<LlmError> for ApplicationError {
    fn from(error: LlmError) -> Self {
        match error {
            LlmError::Setup(message) => ApplicationError::Configuration(message),
            other => ApplicationError::Upstream(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Delay before retry number `attempt` (zero based).
pub fn backoff_delay(attempt: u32) -> Duration {
    let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
    BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_CAP)
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_body<'a>(model: &'a str, request: &'a CompletionRequest) -> ChatCompletionBody<'a> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(ChatMessage { role: "system", content: &request.system_prompt });
    messages.extend(
        request
            .messages
            .iter()
            .map(|turn| ChatMessage { role: turn.role.as_str(), content: &turn.content }),
    );

    ChatCompletionBody {
        model,
        messages,
        temperature: request.purpose.temperature(),
        max_tokens: request.purpose.max_tokens(),
        stream: false,
    }
}

fn parse_completion(raw: &str) -> Result<String, LlmError> {
    let response: ChatCompletionResponse =
        serde_json::from_str(raw).map_err(|e| LlmError::Malformed(e.to_string()))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .unwrap_or_default();

    if content.is_empty() {
        return Err(LlmError::EmptyCompletion);
    }
    Ok(content)
}

fn classify_status(status: StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited,
        code => LlmError::Status { status: code, body },
    }
}

/// Client for OpenAI-compatible chat completion endpoints.
///
/// Does not derive `Debug`; the API key only leaves its `SecretString` when
/// the authorization header is built.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiCompatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = match (config.provider, config.base_url.as_deref()) {
            (_, Some(base_url)) => base_url.to_string(),
            (LlmProvider::OpenAi, None) => OPENAI_BASE_URL.to_string(),
            (LlmProvider::Ollama, None) => {
                return Err(LlmError::Setup("ollama requires llm.base_url".to_string()))
            }
        };
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Setup(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout,
            max_retries: config.max_retries,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send_once(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut builder = self.http.post(&self.endpoint).json(&build_body(&self.model, request));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| self.map_transport(e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;
        if !status.is_success() {
            return Err(classify_status(status, body));
        }
        parse_completion(&body)
    }

    fn map_transport(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout(self.timeout)
        } else {
            LlmError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let mut attempt = 0;
        loop {
            match self.send_once(&request).await {
                Ok(content) => {
                    debug!(
                        event_name = "llm.completion.succeeded",
                        purpose = request.purpose.as_str(),
                        attempt,
                        "completion received"
                    );
                    return Ok(content);
                }
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        event_name = "llm.completion.retrying",
                        purpose = request.purpose.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient completion failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

enum ScriptedReply {
    Text(String),
    Failure,
    Delayed(Duration, String),
}

/// Deterministic [`CompletionClient`] for tests and local smoke runs.
///
/// Each purpose answers with a fixed script. Unscripted purposes fail with a
/// transport error. Every request is recorded for later inspection.
#[derive(Default)]
pub struct ScriptedCompletionClient {
    replies: Mutex<HashMap<CompletionPurpose, ScriptedReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, purpose: CompletionPurpose, text: impl Into<String>) -> Self {
        self.script(purpose, ScriptedReply::Text(text.into()))
    }

    pub fn with_failure(self, purpose: CompletionPurpose) -> Self {
        self.script(purpose, ScriptedReply::Failure)
    }

    pub fn with_delayed_reply(
        self,
        purpose: CompletionPurpose,
        delay: Duration,
        text: impl Into<String>,
    ) -> Self {
        self.script(purpose, ScriptedReply::Delayed(delay, text.into()))
    }

    fn script(self, purpose: CompletionPurpose, reply: ScriptedReply) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.insert(purpose, reply);
        }
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }

    pub fn requests_for(&self, purpose: CompletionPurpose) -> Vec<CompletionRequest> {
        self.requests().into_iter().filter(|request| request.purpose == purpose).collect()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let purpose = request.purpose;
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        let scripted = match self.replies.lock() {
            Ok(replies) => match replies.get(&purpose) {
                Some(ScriptedReply::Text(text)) => Ok((None, text.clone())),
                Some(ScriptedReply::Delayed(delay, text)) => Ok((Some(*delay), text.clone())),
                Some(ScriptedReply::Failure) => Err(LlmError::Status {
                    status: 503,
                    body: "scripted failure".to_string(),
                }),
                None => Err(LlmError::Transport(format!("no script for {}", purpose.as_str()))),
            },
            Err(_) => Err(LlmError::Transport("script lock poisoned".to_string())),
        };

        let (delay, text) = scripted?;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::StatusCode;
    use secrecy::SecretString;

    use instaquote_core::config::{LlmConfig, LlmProvider};
    use instaquote_core::domain::chat::Turn;
    use instaquote_core::errors::ApplicationError;

    use super::{
        backoff_delay, build_body, classify_status, parse_completion, CompletionClient,
        CompletionPurpose, CompletionRequest, LlmError, OpenAiCompatClient,
        ScriptedCompletionClient,
    };

    fn config(provider: LlmProvider, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some(SecretString::from("sk-test".to_string())),
            base_url: base_url.map(ToString::to_string),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 2,
            max_retries: 0,
        }
    }

    fn request(purpose: CompletionPurpose) -> CompletionRequest {
        CompletionRequest {
            purpose,
            system_prompt: "You are a quoting assistant.".to_string(),
            messages: vec![Turn::user("Need a quote"), Turn::assistant("Sure")],
        }
    }

    #[test]
    fn purposes_fix_their_sampling_budget() {
        assert_eq!(CompletionPurpose::QuoteReply.max_tokens(), 500);
        assert_eq!(CompletionPurpose::NameInference.temperature(), 0.0);
        assert_eq!(CompletionPurpose::NameInference.max_tokens(), 50);
        assert_eq!(CompletionPurpose::Summary.max_tokens(), 100);
    }

    #[test]
    fn body_leads_with_system_prompt_then_history() {
        let request = request(CompletionPurpose::Summary);
        let body = serde_json::to_value(build_body("llama3.1", &request)).expect("serialize");

        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["stream"], false);
        let roles = body["messages"]
            .as_array()
            .expect("messages")
            .iter()
            .map(|message| message["role"].as_str().unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        assert_eq!(roles, vec!["system", "user", "assistant"]);
    }

    #[test]
    fn parses_first_choice_and_rejects_empty_content() {
        let ok = r#"{"choices":[{"message":{"role":"assistant","content":"  About $400 \n"}}]}"#;
        assert_eq!(parse_completion(ok).expect("content"), "About $400");

        let empty = r#"{"choices":[{"message":{"role":"assistant","content":"   "}}]}"#;
        assert!(matches!(parse_completion(empty), Err(LlmError::EmptyCompletion)));
        assert!(matches!(parse_completion(r#"{"choices":[]}"#), Err(LlmError::EmptyCompletion)));
        assert!(matches!(parse_completion("<html>"), Err(LlmError::Malformed(_))));
    }

    #[test]
    fn status_classification_drives_retryability() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
        assert!(!LlmError::EmptyCompletion.is_retryable());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(250));
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(3), Duration::from_secs(2));
        assert_eq!(backoff_delay(4), Duration::from_secs(4));
        assert_eq!(backoff_delay(40), Duration::from_secs(4));
    }

    #[test]
    fn endpoint_defaults_per_provider() {
        let openai = OpenAiCompatClient::from_config(&config(LlmProvider::OpenAi, None))
            .expect("openai client");
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        let ollama = OpenAiCompatClient::from_config(&config(
            LlmProvider::Ollama,
            Some("http://localhost:11434/v1/"),
        ))
        .expect("ollama client");
        assert_eq!(ollama.endpoint(), "http://localhost:11434/v1/chat/completions");

        let missing = OpenAiCompatClient::from_config(&config(LlmProvider::Ollama, None));
        assert!(matches!(missing, Err(LlmError::Setup(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_surfaces_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let client = OpenAiCompatClient::from_config(&config(
            LlmProvider::Ollama,
            Some(&format!("http://127.0.0.1:{port}/v1")),
        ))
        .expect("client");

        let error = client
            .complete(request(CompletionPurpose::QuoteReply))
            .await
            .expect_err("nothing is listening");
        assert!(error.is_retryable());
        assert!(matches!(ApplicationError::from(error), ApplicationError::Upstream(_)));
    }

    #[tokio::test]
    async fn scripted_client_records_requests() {
        let client = ScriptedCompletionClient::new()
            .with_reply(CompletionPurpose::QuoteReply, "Roughly $1,200")
            .with_failure(CompletionPurpose::Summary);

        let reply = client.complete(request(CompletionPurpose::QuoteReply)).await;
        assert_eq!(reply.expect("reply"), "Roughly $1,200");
        assert!(client.complete(request(CompletionPurpose::Summary)).await.is_err());
        assert!(client.complete(request(CompletionPurpose::NameInference)).await.is_err());

        assert_eq!(client.requests().len(), 3);
        assert_eq!(client.requests_for(CompletionPurpose::Summary).len(), 1);
    }
}
