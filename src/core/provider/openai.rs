//! OpenAI chat completions, also used for Groq's OpenAI-compatible
//! endpoint.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::{Completion, CompletionClient, ProviderError, Usage, status_error, structured, transport_error};
use crate::core::schema::Schema;
use crate::infra::config::ProviderConfig;

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

pub struct OpenAiClient {
    http: Client,
    api_key: String,
    url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    /// `default_url` is used unless the provider config sets `base_url`.
    pub fn new(api_key: String, config: &ProviderConfig, default_url: &str) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(Self {
            http,
            api_key,
            url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_url.to_string()),
            model: config.model.clone(),
            timeout,
        })
    }

    fn build_request_body(&self, prompt: &str, schema: Option<&Schema>) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(schema) = schema {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: schema_instruction(schema),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        ChatRequest {
            model: self.model.clone(),
            messages,
            response_format: schema.map(|_| json!({ "type": "json_object" })),
        }
    }
}

/// System instruction asking for JSON shaped by `schema`.
pub(crate) fn schema_instruction(schema: &Schema) -> String {
    format!(
        "Answer with a single JSON object, and nothing else, that conforms to this JSON Schema:\n{}",
        schema.to_json_schema()
    )
}

fn parse_response(resp: ChatResponse, schema: Option<&Schema>) -> Result<Completion, ProviderError> {
    let text = resp
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ProviderError::Parse("no choices in response".to_string()))?;

    let data = match schema {
        Some(schema) => structured(&text, schema)?,
        None => Value::String(text),
    };
    let usage = resp.usage.map_or_else(Usage::default, |u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });
    Ok(Completion { data, usage })
}

impl CompletionClient for OpenAiClient {
    fn complete(&self, prompt: &str, schema: Option<&Schema>) -> Result<Completion, ProviderError> {
        let body = self.build_request_body(prompt, schema);
        debug!(model = %body.model, url = %self.url, "chat completion request");

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, resp.text().unwrap_or_default()));
        }

        let api_resp: ChatResponse = resp
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        parse_response(api_resp, schema)
    }
}

// OpenAI wire types

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::stub;
    use crate::infra::config::ProvidersConfig;

    fn client(url: &str) -> OpenAiClient {
        let config = ProvidersConfig::default().openai;
        OpenAiClient::new("sk-test".into(), &config, url).unwrap()
    }

    #[test]
    fn test_plain_request_has_single_user_message() {
        let body = client(OPENAI_API_URL).build_request_body("hello", None);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "gpt-4o");
        assert_eq!(v["messages"].as_array().unwrap().len(), 1);
        assert_eq!(v["messages"][0]["content"], "hello");
        assert!(v.get("response_format").is_none());
    }

    #[test]
    fn test_schema_request_asks_for_json() {
        let schema = Schema::from_example(&json!({ "title": "short title" })).wrapped();
        let body = client(GROQ_API_URL).build_request_body("q", Some(&schema));
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["response_format"]["type"], "json_object");
        assert_eq!(v["messages"][0]["role"], "system");
        assert!(v["messages"][0]["content"].as_str().unwrap().contains("short title"));
    }

    #[test]
    fn test_base_url_override() {
        let mut config = ProvidersConfig::default().groq;
        config.base_url = Some("http://localhost:9/v1/chat/completions".into());
        let c = OpenAiClient::new("k".into(), &config, GROQ_API_URL).unwrap();
        assert_eq!(c.url, "http://localhost:9/v1/chat/completions");
        assert_eq!(c.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_parse_response_text_and_usage() {
        let raw: ChatResponse = serde_json::from_value(json!({
            "choices": [{ "message": { "content": "hi" } }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4 }
        }))
        .unwrap();
        let c = parse_response(raw, None).unwrap();
        assert_eq!(c.data, json!("hi"));
        assert_eq!(c.usage.total_tokens, 4);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let raw: ChatResponse = serde_json::from_value(json!({ "choices": [] })).unwrap();
        assert!(matches!(parse_response(raw, None), Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_unauthorized_is_auth_error() {
        let (url, rx) = stub::serve_once("401 Unauthorized", r#"{"error":{"message":"invalid key"}}"#);
        let c = client(&url);

        let err = c.complete("hello", None).unwrap_err();

        assert!(matches!(&err, ProviderError::Auth(m) if m.contains("invalid key")));
        let request = rx.recv().unwrap();
        assert!(request.contains("authorization: Bearer sk-test") || request.contains("Authorization: Bearer sk-test"));
    }

    #[test]
    fn test_complete_against_local_server() {
        let (url, rx) = stub::serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"content":"hi there"}}],"usage":{"prompt_tokens":2,"completion_tokens":2,"total_tokens":4}}"#,
        );

        let c = client(&url).complete("hello", None).unwrap();

        assert_eq!(c.data, json!("hi there"));
        assert_eq!(c.usage.total_tokens, 4);
        assert!(rx.recv().unwrap().contains("\"content\":\"hello\""));
    }

    #[test]
    fn test_unreachable_endpoint_is_network_error() {
        let mut config = ProvidersConfig::default().openai;
        config.timeout_secs = 2;
        let c = OpenAiClient::new("k".into(), &config, "http://127.0.0.1:9/v1/chat/completions").unwrap();
        let err = c.complete("hello", None).unwrap_err();
        assert!(matches!(err, ProviderError::Network(_) | ProviderError::Timeout(_)));
    }
}
