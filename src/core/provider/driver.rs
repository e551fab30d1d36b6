//! Provider selection and ordered fallback.
//!
//! A provider is eligible when it has a credential and the prompt fits
//! its context window. The driver walks a working copy of the caller's
//! preference list, invokes the first eligible provider, and on failure
//! drops that provider from the copy and tries again. The caller's list
//! is never touched.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ClientFactory, ProviderError, ProviderId, Usage};
use crate::core::schema::{Schema, WRAPPER_FIELD};
use crate::core::tokens::TokenCount;
use crate::infra::config::ProvidersConfig;

/// Terminal request failure.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("no eligible provider left ({})", describe_tried(.tried))]
    AllProvidersExhausted {
        /// Providers invoked and failed, in order
        tried: Vec<ProviderId>,
        #[source]
        last: Option<ProviderError>,
    },
}

fn describe_tried(tried: &[ProviderId]) -> String {
    if tried.is_empty() {
        return "none was invoked".to_string();
    }
    let names: Vec<&str> = tried.iter().map(|p| p.as_str()).collect();
    format!("tried {}", names.join(", "))
}

/// A provider invocation that failed and was recovered from.
#[derive(Debug)]
pub struct ProviderFailure {
    pub provider: ProviderId,
    pub error: ProviderError,
}

#[derive(Debug, Serialize)]
pub struct RequestOutcome {
    pub data: Value,
    pub usage: Usage,
    /// Provider that answered
    pub provider: ProviderId,
    #[serde(skip)]
    pub failures: Vec<ProviderFailure>,
}

/// Eligibility rules over a provider configuration.
pub struct Selector<'a> {
    config: &'a ProvidersConfig,
}

impl<'a> Selector<'a> {
    pub fn new(config: &'a ProvidersConfig) -> Self {
        Self { config }
    }

    pub fn eligible(&self, id: ProviderId, tokens: usize) -> bool {
        let p = self.config.get(id);
        let has_key = p.api_key.as_deref().is_some_and(|k| !k.is_empty());
        has_key && tokens < p.context_window
    }

    /// First eligible provider in preference order.
    pub fn select(&self, tokens: usize, preferences: &[ProviderId]) -> Option<ProviderId> {
        preferences
            .iter()
            .copied()
            .find(|id| self.eligible(*id, tokens))
    }
}

/// Drives selection, invocation and fallback for one prompt at a time.
pub struct FallbackDriver<'a> {
    config: &'a ProvidersConfig,
    counter: &'a dyn TokenCount,
    clients: &'a dyn ClientFactory,
}

impl<'a> FallbackDriver<'a> {
    pub fn new(config: &'a ProvidersConfig, counter: &'a dyn TokenCount, clients: &'a dyn ClientFactory) -> Self {
        Self {
            config,
            counter,
            clients,
        }
    }

    /// Ask with the configured preference order.
    pub fn request_default(&self, prompt: &str, schema: Option<&Schema>) -> Result<RequestOutcome, RequestError> {
        self.request(prompt, schema, &self.config.preferences)
    }

    /// Ask the first eligible provider, falling back on failure.
    ///
    /// With a schema, providers are asked for `{schema: <answer>}` and the
    /// returned `data` is the unwrapped answer.
    pub fn request(
        &self,
        prompt: &str,
        schema: Option<&Schema>,
        preferences: &[ProviderId],
    ) -> Result<RequestOutcome, RequestError> {
        let tokens = self.counter.count(prompt);
        let selector = Selector::new(self.config);
        let wrapped = schema.map(Schema::wrapped);

        let mut working: Vec<ProviderId> = Vec::with_capacity(preferences.len());
        for id in preferences {
            if !working.contains(id) {
                working.push(*id);
            }
        }
        let mut failures: Vec<ProviderFailure> = Vec::new();

        while let Some(id) = selector.select(tokens, &working) {
            info!(provider = %id, tokens, "requesting completion");
            let attempt = self
                .clients
                .client(id, self.config.get(id))
                .and_then(|client| client.complete(prompt, wrapped.as_ref()))
                .and_then(|completion| {
                    let data = if wrapped.is_some() {
                        unwrap_schema(completion.data)?
                    } else {
                        completion.data
                    };
                    Ok((data, completion.usage))
                });

            match attempt {
                Ok((data, usage)) => {
                    return Ok(RequestOutcome {
                        data,
                        usage,
                        provider: id,
                        failures,
                    });
                }
                Err(error) => {
                    warn!(provider = %id, "provider failed: {error}");
                    working.retain(|p| *p != id);
                    debug!(remaining = ?working, "remaining preferences");
                    failures.push(ProviderFailure { provider: id, error });
                }
            }
        }

        let tried = failures.iter().map(|f| f.provider).collect();
        Err(RequestError::AllProvidersExhausted {
            tried,
            last: failures.pop().map(|f| f.error),
        })
    }
}

fn unwrap_schema(data: Value) -> Result<Value, ProviderError> {
    match data {
        Value::Object(mut map) => map
            .remove(WRAPPER_FIELD)
            .ok_or_else(|| ProviderError::Parse(format!("answer lacks the `{WRAPPER_FIELD}` field"))),
        _ => Err(ProviderError::Parse("structured answer is not an object".to_string())),
    }
}

/// Full prompt sent for a question about a rendered context.
pub fn compose_prompt(context: &str, question: Option<&str>) -> String {
    match question.map(str::trim) {
        Some(q) if !q.is_empty() => format!("{context}\n\n# {q}"),
        _ => context.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::provider::{Completion, CompletionClient};
    use crate::infra::config::ProviderConfig;
    use serde_json::json;
    use std::cell::RefCell;

    struct Fake {
        fail: bool,
        reply: Value,
    }

    impl CompletionClient for Fake {
        fn complete(&self, _prompt: &str, _schema: Option<&Schema>) -> Result<Completion, ProviderError> {
            if self.fail {
                return Err(ProviderError::Network("connection reset".into()));
            }
            Ok(Completion {
                data: self.reply.clone(),
                usage: Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                },
            })
        }
    }

    fn keyed() -> ProvidersConfig {
        let mut cfg = ProvidersConfig::default();
        cfg.openai.api_key = Some("a".into());
        cfg.anthropic.api_key = Some("b".into());
        cfg.groq.api_key = Some("c".into());
        cfg
    }

    fn words(s: &str) -> usize {
        s.split_whitespace().count()
    }

    #[test]
    fn test_two_failures_then_success() {
        let cfg = keyed();
        let calls = RefCell::new(Vec::new());
        let factory = |id: ProviderId, _: &ProviderConfig| -> Result<Box<dyn CompletionClient>, ProviderError> {
            calls.borrow_mut().push(id);
            Ok(Box::new(Fake {
                fail: id != ProviderId::Groq,
                reply: json!("from groq"),
            }))
        };
        let prefs = vec![ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Groq];
        let driver = FallbackDriver::new(&cfg, &words, &factory);

        let out = driver.request("hello there", None, &prefs).unwrap();

        assert_eq!(out.provider, ProviderId::Groq);
        assert_eq!(out.data, json!("from groq"));
        assert_eq!(out.failures.len(), 2);
        assert_eq!(*calls.borrow(), prefs);
        assert_eq!(prefs, vec![ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Groq]);
    }

    #[test]
    fn test_exhaustion_chains_last_error() {
        let cfg = keyed();
        let factory = |_: ProviderId, _: &ProviderConfig| -> Result<Box<dyn CompletionClient>, ProviderError> {
            Ok(Box::new(Fake {
                fail: true,
                reply: Value::Null,
            }))
        };
        let driver = FallbackDriver::new(&cfg, &words, &factory);
        let err = driver
            .request("q", None, &[ProviderId::Anthropic, ProviderId::OpenAi])
            .unwrap_err();
        let RequestError::AllProvidersExhausted { tried, last } = err;
        assert_eq!(tried, vec![ProviderId::Anthropic, ProviderId::OpenAi]);
        assert!(matches!(last, Some(ProviderError::Network(_))));
    }

    #[test]
    fn test_missing_credential_is_never_eligible() {
        let mut cfg = keyed();
        cfg.openai.api_key = None;
        let sel = Selector::new(&cfg);
        assert!(!sel.eligible(ProviderId::OpenAi, 1));
        assert_eq!(
            sel.select(1, &[ProviderId::OpenAi, ProviderId::Groq]),
            Some(ProviderId::Groq)
        );
    }

    #[test]
    fn test_context_window_is_exclusive() {
        let mut cfg = keyed();
        cfg.openai.context_window = 10;
        let sel = Selector::new(&cfg);
        assert!(sel.eligible(ProviderId::OpenAi, 9));
        assert!(!sel.eligible(ProviderId::OpenAi, 10));
    }

    #[test]
    fn test_nothing_eligible_means_no_invocation() {
        let cfg = ProvidersConfig::default();
        let factory = |_: ProviderId, _: &ProviderConfig| -> Result<Box<dyn CompletionClient>, ProviderError> {
            panic!("must not be invoked")
        };
        let driver = FallbackDriver::new(&cfg, &words, &factory);
        let RequestError::AllProvidersExhausted { tried, last } =
            driver.request_default("q", None).unwrap_err();
        assert!(tried.is_empty());
        assert!(last.is_none());
    }

    #[test]
    fn test_schema_answer_is_unwrapped() {
        let cfg = keyed();
        let factory = |_: ProviderId, _: &ProviderConfig| -> Result<Box<dyn CompletionClient>, ProviderError> {
            Ok(Box::new(Fake {
                fail: false,
                reply: json!({ "schema": { "summary": "ok" } }),
            }))
        };
        let schema = Schema::from_example(&json!({ "summary": "one line" }));
        let driver = FallbackDriver::new(&cfg, &words, &factory);
        let out = driver.request("q", Some(&schema), &[ProviderId::Groq]).unwrap();
        assert_eq!(out.data, json!({ "summary": "ok" }));
    }

    #[test]
    fn test_unwrapped_answer_counts_as_failure() {
        let cfg = keyed();
        let factory = |id: ProviderId, _: &ProviderConfig| -> Result<Box<dyn CompletionClient>, ProviderError> {
            let reply = if id == ProviderId::OpenAi {
                json!({ "summary": "no wrapper" })
            } else {
                json!({ "schema": { "summary": "wrapped" } })
            };
            Ok(Box::new(Fake { fail: false, reply }))
        };
        let schema = Schema::from_example(&json!({ "summary": "one line" }));
        let driver = FallbackDriver::new(&cfg, &words, &factory);
        let out = driver
            .request("q", Some(&schema), &[ProviderId::OpenAi, ProviderId::Groq])
            .unwrap();
        assert_eq!(out.provider, ProviderId::Groq);
        assert_eq!(out.failures.len(), 1);
    }

    #[test]
    fn test_compose_prompt() {
        assert_eq!(compose_prompt("ctx", Some("why?")), "ctx\n\n# why?");
        assert_eq!(compose_prompt("ctx", Some("  ")), "ctx");
        assert_eq!(compose_prompt("ctx", None), "ctx");
    }
}
