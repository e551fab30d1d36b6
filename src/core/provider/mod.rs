//! LLM providers: identifiers, the completion seam, and the HTTP clients.
//!
//! The driver in [`driver`] only ever talks to [`CompletionClient`]; the
//! HTTP implementations live in [`openai`] (OpenAI and Groq) and
//! [`anthropic`].

pub mod anthropic;
pub mod driver;
pub mod openai;

pub use driver::{FallbackDriver, ProviderFailure, RequestError, RequestOutcome, Selector, compose_prompt};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::core::schema::{Schema, SchemaError};
use crate::infra::config::ProviderConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Groq,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Groq];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderId::OpenAi => "OPENAI",
            ProviderId::Anthropic => "ANTHROPIC",
            ProviderId::Groq => "GROQ",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown provider '{s}' (expected OPENAI, ANTHROPIC or GROQ)"))
    }
}

/// Errors from a single provider call. Any of them makes the driver move
/// on to the next eligible provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed (check API key): {0}")]
    Auth(String),

    #[error("provider returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("response does not match schema: {0}")]
    Validation(#[from] SchemaError),
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Normalized provider answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    /// Plain text, or the validated object when a schema was given
    pub data: Value,
    pub usage: Usage,
}

/// A backend that can answer one prompt.
pub trait CompletionClient: Send + Sync {
    /// Ask once. With a schema, `data` must be an object validated
    /// against it.
    fn complete(&self, prompt: &str, schema: Option<&Schema>) -> Result<Completion, ProviderError>;
}

/// Builds a client for a selected provider.
pub trait ClientFactory {
    fn client(&self, id: ProviderId, config: &ProviderConfig) -> Result<Box<dyn CompletionClient>, ProviderError>;
}

impl<F> ClientFactory for F
where
    F: Fn(ProviderId, &ProviderConfig) -> Result<Box<dyn CompletionClient>, ProviderError>,
{
    fn client(&self, id: ProviderId, config: &ProviderConfig) -> Result<Box<dyn CompletionClient>, ProviderError> {
        self(id, config)
    }
}

/// Real HTTP clients for every provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClients;

impl ClientFactory for HttpClients {
    fn client(&self, id: ProviderId, config: &ProviderConfig) -> Result<Box<dyn CompletionClient>, ProviderError> {
        let key = config
            .api_key
            .clone()
            .ok_or_else(|| ProviderError::Auth(format!("no API key configured for {id}")))?;
        let client: Box<dyn CompletionClient> = match id {
            ProviderId::OpenAi => Box::new(openai::OpenAiClient::new(key, config, openai::OPENAI_API_URL)?),
            ProviderId::Groq => Box::new(openai::OpenAiClient::new(key, config, openai::GROQ_API_URL)?),
            ProviderId::Anthropic => Box::new(anthropic::AnthropicClient::new(key, config)?),
        };
        Ok(client)
    }
}

/// Shared conversion for reqwest failures.
pub(crate) fn transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Error for a non-success status. 401 and 403 mean a bad credential.
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(body),
        code => ProviderError::Status {
            status: code,
            message: body,
        },
    }
}

/// Parse the model's text as JSON and validate it. Tolerates a fenced
/// ```json block around the object.
pub(crate) fn structured(text: &str, schema: &Schema) -> Result<Value, ProviderError> {
    let trimmed = text.trim();
    let candidate = crate::core::template::extract_code_blocks(trimmed)
        .into_iter()
        .next()
        .filter(|_| trimmed.starts_with("```"))
        .map_or_else(|| trimmed.to_string(), |b| b.code);
    let value: Value =
        serde_json::from_str(&candidate).map_err(|e| ProviderError::Parse(format!("expected JSON answer: {e}")))?;
    Ok(schema.validate(&value)?)
}
