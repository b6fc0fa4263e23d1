//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.

use std::time::Duration;

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionModel, Message};
use serde_json::Value;

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Max characters of a provider error kept in `RequestFailed`.
const ERROR_PREVIEW: usize = 300;

/// A rig completion model exposed as an [`LlmProvider`].
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
    /// Extra request parameters that switch the backend into JSON mode.
    json_params: Option<Value>,
    timeout: Duration,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, model_name: &str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider: "llm",
            json_params: None,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_provider(mut self, provider: &'static str) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_json_params(mut self, params: Value) -> Self {
        self.json_params = Some(params);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, mut history) = split_messages(request.messages);
        let Some(prompt) = history.pop() else {
            return Err(LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: "request has no user message".to_string(),
            });
        };

        let mut builder = self.model.completion_request(prompt);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if !history.is_empty() {
            builder = builder.messages(history);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }
        if request.json_mode
            && let Some(params) = &self.json_params
        {
            builder = builder.additional_params(params.clone());
        }

        let response = tokio::time::timeout(self.timeout, self.model.completion(builder.build()))
            .await
            .map_err(|_| LlmError::RequestFailed {
                provider: self.provider.to_string(),
                reason: format!("timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| map_failure(self.provider, &e.to_string()))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect();
        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "no text in completion".to_string(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }
}

/// System messages become the preamble; the rest keep their order.
fn split_messages(messages: Vec<ChatMessage>) -> (Option<String>, Vec<Message>) {
    let mut system = Vec::new();
    let mut history = Vec::new();
    for message in messages {
        match message.role {
            Role::System => system.push(message.content),
            Role::User => history.push(Message::user(message.content)),
            Role::Assistant => history.push(Message::assistant(message.content)),
        }
    }
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));
    (preamble, history)
}

/// rig reports provider failures as text; recover the cases callers act on.
fn map_failure(provider: &str, message: &str) -> LlmError {
    let lower = message.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if mentions(&["429", "rate limit", "rate_limit", "too many requests"]) {
        LlmError::RateLimited {
            provider: provider.to_string(),
        }
    } else if mentions(&["401", "403", "unauthorized", "invalid api key", "invalid_api_key"]) {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: message.chars().take(ERROR_PREVIEW).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_become_preamble() {
        let (preamble, history) = split_messages(vec![
            ChatMessage::system("Tu classes des tickets."),
            ChatMessage::system("Réponds en JSON."),
            ChatMessage::user("Sujet: test"),
        ]);
        assert_eq!(
            preamble.as_deref(),
            Some("Tu classes des tickets.\n\nRéponds en JSON.")
        );
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn no_system_message_means_no_preamble() {
        let (preamble, history) = split_messages(vec![ChatMessage {
            role: Role::Assistant,
            content: "ok".into(),
        }]);
        assert!(preamble.is_none());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn rate_limit_text_maps_to_rate_limited() {
        let err = map_failure(
            "groq",
            r#"{"error":{"message":"Rate limit reached for model","code":"rate_limit_exceeded"}}"#,
        );
        assert!(matches!(err, LlmError::RateLimited { .. }));
        assert!(matches!(
            map_failure("groq", "HTTP 429 Too Many Requests"),
            LlmError::RateLimited { .. }
        ));
    }

    #[test]
    fn auth_text_maps_to_auth_failed() {
        let err = map_failure("openai", r#"{"error":{"message":"Invalid API Key"}}"#);
        assert!(matches!(err, LlmError::AuthFailed { .. }));
        assert!(matches!(
            map_failure("openai", "status 401 Unauthorized"),
            LlmError::AuthFailed { .. }
        ));
    }

    #[test]
    fn other_failures_keep_a_bounded_reason() {
        let long = "x".repeat(1000);
        match map_failure("groq", &long) {
            LlmError::RequestFailed { provider, reason } => {
                assert_eq!(provider, "groq");
                assert_eq!(reason.len(), ERROR_PREVIEW);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
