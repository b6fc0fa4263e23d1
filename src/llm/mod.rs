//! LLM integration for mail-triage.
//!
//! Supports:
//! - **Groq**: chat completions via rig-core
//! - **OpenAI**: Responses API via rig-core
//!
//! Uses the rig-core crate for HTTP transport and the `RigAdapter` to bridge
//! rig's `CompletionModel` trait to our `LlmProvider` trait.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use rig::client::CompletionClient;
use secrecy::ExposeSecret;
use serde_json::json;

use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Groq,
    OpenAi,
}

impl LlmBackend {
    pub fn name(self) -> &'static str {
        match self {
            Self::Groq => "groq",
            Self::OpenAi => "openai",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Groq => "llama-3.1-8b-instant",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    /// Environment variable holding this backend's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

impl std::str::FromStr for LlmBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "groq" => Ok(Self::Groq),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue {
                key: "TRIAGE_LLM_BACKEND".to_string(),
                message: format!("unknown backend '{other}' (expected groq or openai)"),
            }),
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Groq => create_groq_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_groq_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::groq;

    let api_key = config.api_key.expose_secret();
    let client: groq::Client = if config.base_url == LlmBackend::Groq.default_base_url() {
        groq::Client::new(api_key).map_err(client_error("groq"))?
    } else {
        groq::Client::builder()
            .api_key(api_key)
            .base_url(config.base_url.as_str())
            .build()
            .map_err(client_error("groq"))?
    };

    let model = client.completion_model(&config.model);
    tracing::info!("Using Groq (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, &config.model)
            .with_provider("groq")
            .with_timeout(config.timeout)
            .with_json_params(json!({ "response_format": { "type": "json_object" } })),
    ))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let api_key = config.api_key.expose_secret();
    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        if config.base_url == LlmBackend::OpenAi.default_base_url() {
            openai::Client::new(api_key).map_err(client_error("openai"))?
        } else {
            openai::Client::builder()
                .api_key(api_key)
                .base_url(config.base_url.as_str())
                .build()
                .map_err(client_error("openai"))?
        };

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(
        RigAdapter::new(model, &config.model)
            .with_provider("openai")
            .with_timeout(config.timeout)
            .with_json_params(json!({ "text": { "format": { "type": "json_object" } } })),
    ))
}

fn client_error<E: Display>(provider: &'static str) -> impl Fn(E) -> LlmError {
    move |e| LlmError::RequestFailed {
        provider: provider.to_string(),
        reason: format!("Failed to create client: {e}"),
    }
}
