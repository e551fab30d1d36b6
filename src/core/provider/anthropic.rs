//! Anthropic Messages API.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::openai::schema_instruction;
use super::{Completion, CompletionClient, ProviderError, Usage, status_error, structured, transport_error};
use crate::core::schema::Schema;
use crate::infra::config::ProviderConfig;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    http: Client,
    api_key: String,
    url: String,
    model: String,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(api_key: String, config: &ProviderConfig) -> Result<Self, ProviderError> {
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
                .unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
            model: config.model.clone(),
            timeout,
        })
    }

    fn build_request_body(&self, prompt: &str, schema: Option<&Schema>) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: schema.map(schema_instruction),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        }
    }
}

fn parse_response(resp: MessagesResponse, schema: Option<&Schema>) -> Result<Completion, ProviderError> {
    let text: String = resp
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::Other => None,
        })
        .collect();
    if text.is_empty() {
        return Err(ProviderError::Parse("no text content in response".to_string()));
    }

    let data = match schema {
        Some(schema) => structured(&text, schema)?,
        None => Value::String(text),
    };
    let usage = Usage {
        prompt_tokens: resp.usage.input_tokens,
        completion_tokens: resp.usage.output_tokens,
        total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
    };
    Ok(Completion { data, usage })
}

impl CompletionClient for AnthropicClient {
    fn complete(&self, prompt: &str, schema: Option<&Schema>) -> Result<Completion, ProviderError> {
        let body = self.build_request_body(prompt, schema);
        debug!(model = %body.model, "Anthropic messages request");

        let resp = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, resp.text().unwrap_or_default()));
        }

        let api_resp: MessagesResponse = resp
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        parse_response(api_resp, schema)
    }
}

// Anthropic wire types

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: MessagesUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessagesUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::stub;
    use crate::infra::config::ProvidersConfig;
    use serde_json::json;

    fn client() -> AnthropicClient {
        AnthropicClient::new("key".into(), &ProvidersConfig::default().anthropic).unwrap()
    }

    fn client_at(url: &str) -> AnthropicClient {
        let mut config = ProvidersConfig::default().anthropic;
        config.base_url = Some(url.to_string());
        AnthropicClient::new("key".into(), &config).unwrap()
    }

    #[test]
    fn test_forbidden_is_auth_error() {
        let (url, rx) = stub::serve_once("403 Forbidden", r#"{"type":"error"}"#);

        let err = client_at(&url).complete("q", None).unwrap_err();

        assert!(matches!(err, ProviderError::Auth(_)));
        let request = rx.recv().unwrap().to_ascii_lowercase();
        assert!(request.contains("x-api-key: key"));
        assert!(request.contains("anthropic-version: 2023-06-01"));
    }

    #[test]
    fn test_server_error_keeps_status() {
        let (url, _rx) = stub::serve_once("529 Overloaded", r#"{"type":"error"}"#);

        let err = client_at(&url).complete("q", None).unwrap_err();

        assert!(matches!(err, ProviderError::Status { status: 529, .. }));
    }

    #[test]
    fn test_complete_against_local_server() {
        let (url, _rx) = stub::serve_once(
            "200 OK",
            r#"{"content":[{"type":"text","text":"fine"}],"usage":{"input_tokens":3,"output_tokens":1}}"#,
        );

        let c = client_at(&url).complete("q", None).unwrap();

        assert_eq!(c.data, json!("fine"));
        assert_eq!(c.usage.total_tokens, 4);
    }

    #[test]
    fn test_build_request() {
        let body = client().build_request_body("explain", None);
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["model"], "claude-3-5-haiku-20241022");
        assert_eq!(v["max_tokens"], MAX_TOKENS);
        assert_eq!(v["messages"][0]["role"], "user");
        assert!(v.get("system").is_none());
    }

    #[test]
    fn test_schema_goes_into_system_prompt() {
        let schema = Schema::from_example(&json!({ "risk": "low|high" })).wrapped();
        let body = client().build_request_body("q", Some(&schema));
        assert!(body.system.unwrap().contains("low|high"));
    }

    #[test]
    fn test_parse_structured_response() {
        let schema = Schema::from_example(&json!({ "risk": "low|high" })).wrapped();
        let raw: MessagesResponse = serde_json::from_value(json!({
            "content": [
                { "type": "text", "text": "{\"schema\": {\"risk\": \"low\"}}" },
                { "type": "tool_use", "id": "x", "name": "n", "input": {} }
            ],
            "usage": { "input_tokens": 10, "output_tokens": 5 }
        }))
        .unwrap();
        let c = parse_response(raw, Some(&schema)).unwrap();
        assert_eq!(c.data["schema"]["risk"], "low");
        assert_eq!(c.usage.total_tokens, 15);
    }
}
