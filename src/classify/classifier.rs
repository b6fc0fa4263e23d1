//! Model-backed classifier with keyword fallback.
//!
//! `classify` never fails: transport errors, rate limiting, malformed JSON and
//! a disabled model all degrade to the keyword rules for that message only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::classify::Classify;
use crate::classify::fallback::classify_by_rules;
use crate::classify::pacing::Pacer;
use crate::classify::prompt::{build_system_prompt, build_user_prompt};
use crate::classify::taxonomy::{MatchKind, Taxonomy};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{RawMessage, Verdict, VerdictOrigin};

/// Keys accepted for each field, in preference order.
const CATEGORY_KEYS: &[&str] = &["category", "categorie", "catégorie"];
const URGENCY_KEYS: &[&str] = &["urgency", "urgence", "priority", "priorite", "priorité"];
const SUMMARY_KEYS: &[&str] = &["summary", "synthese", "synthèse", "reasoning"];

/// Tuning for the classification call.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Body characters sent to the model.
    pub body_prefix_chars: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Remote calls in flight at once within a batch.
    pub concurrency: usize,
    /// Minimum spacing between the start of two remote calls.
    pub call_delay: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            body_prefix_chars: 2000,
            temperature: 0.2,
            max_tokens: 512,
            concurrency: 1,
            call_delay: Duration::from_millis(100),
        }
    }
}

/// Classifies messages into a [`Verdict`].
pub struct Classifier {
    llm: Option<Arc<dyn LlmProvider>>,
    taxonomy: Arc<Taxonomy>,
    config: ClassifierConfig,
    pacer: Pacer,
}

impl Classifier {
    /// Classifier backed by a remote model.
    pub fn new(llm: Arc<dyn LlmProvider>, taxonomy: Arc<Taxonomy>, config: ClassifierConfig) -> Self {
        let pacer = Pacer::new(config.call_delay);
        Self {
            llm: Some(llm),
            taxonomy,
            config,
            pacer,
        }
    }

    /// Classifier that only applies the keyword rules.
    pub fn rules_only(taxonomy: Arc<Taxonomy>, config: ClassifierConfig) -> Self {
        let pacer = Pacer::new(Duration::ZERO);
        Self {
            llm: None,
            taxonomy,
            config,
            pacer,
        }
    }

    /// Classify one message. Always returns a valid verdict.
    pub async fn classify(&self, subject: &str, body: &str) -> Verdict {
        let Some(llm) = &self.llm else {
            return classify_by_rules(subject, body);
        };

        self.pacer.wait().await;

        match self.ask_model(llm.as_ref(), subject, body).await {
            Ok(verdict) => verdict,
            Err(reason) => {
                warn!(
                    subject = %preview(subject),
                    reason = %reason,
                    "Classification failed, using keyword fallback"
                );
                classify_by_rules(subject, body)
            }
        }
    }

    async fn ask_model(
        &self,
        llm: &dyn LlmProvider,
        subject: &str,
        body: &str,
    ) -> Result<Verdict, String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_user_prompt(
                &self.taxonomy,
                subject,
                body,
                self.config.body_prefix_chars,
            )),
        ])
        .with_temperature(self.config.temperature)
        .with_max_tokens(self.config.max_tokens)
        .with_json_mode();

        let response = llm
            .complete(request)
            .await
            .map_err(|e| format!("LLM call failed: {e}"))?;

        parse_verdict_response(&response.content, &self.taxonomy).map_err(|e| {
            debug!(raw_response = %preview(&response.content), "Unparsable classification");
            format!("parse failed: {e}")
        })
    }
}

#[async_trait]
impl Classify for Classifier {
    async fn classify_batch(&self, messages: &[RawMessage]) -> Vec<Verdict> {
        let concurrency = self.config.concurrency.max(1);
        info!(
            count = messages.len(),
            concurrency,
            call_delay_ms = self.pacer.interval().as_millis() as u64,
            model = self.llm.as_ref().map_or("rules", |llm| llm.model_name()),
            "Classifying messages"
        );

        // `buffered` yields in input order, which positional pairing relies on.
        let pending: Vec<_> = messages
            .iter()
            .map(|m| self.classify(&m.subject, &m.body))
            .collect();
        stream::iter(pending).buffered(concurrency).collect().await
    }
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse and normalize the model's answer.
pub fn parse_verdict_response(raw: &str, taxonomy: &Taxonomy) -> Result<Verdict, String> {
    let json_str = extract_json_object(raw);
    let value: Value =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;
    let Value::Object(object) = value else {
        return Err("response is not a JSON object".to_string());
    };

    let raw_category = pick_str(&object, CATEGORY_KEYS).unwrap_or_default();
    let raw_urgency = pick_str(&object, URGENCY_KEYS).unwrap_or_default();
    let summary = pick_str(&object, SUMMARY_KEYS).unwrap_or_default();

    let category = taxonomy.normalize_category(raw_category);
    if category.kind == MatchKind::Defaulted {
        warn!(
            value = raw_category,
            default = taxonomy.category_label(category.value),
            "Unknown category, using default"
        );
    }
    let urgency = taxonomy.normalize_urgency(raw_urgency);
    if urgency.kind == MatchKind::Defaulted {
        warn!(
            value = raw_urgency,
            default = taxonomy.urgency_label(urgency.value),
            "Unknown urgency, using default"
        );
    }

    Ok(Verdict::new(
        category.value,
        urgency.value,
        summary,
        VerdictOrigin::Model,
    ))
}

/// First string value among `keys`.
fn pick_str<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
}

/// Extract a JSON object from model output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

fn preview(text: &str) -> String {
    text.chars().take(80).collect()
}
