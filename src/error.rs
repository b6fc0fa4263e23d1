//! Error types for mail-triage.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Message source error: {0}")]
    Source(#[from] SourceError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox (message source) errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication failed for {username}")]
    AuthFailed { username: String },

    #[error("Command {command} rejected: {response}")]
    CommandFailed { command: String, response: String },

    #[error("Message {id} not found")]
    NotFound { id: String },

    #[error("Message {id} could not be parsed")]
    Unparsable { id: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Store API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response from store: {0}")]
    InvalidResponse(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    #[error("Nothing to append")]
    EmptyAppend,
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited")]
    RateLimited { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Errors that abort a whole pipeline run.
///
/// Everything per-message (content fetch, classification, write, mark-read)
/// is counted in the run summary instead of surfacing here.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to list unread messages: {0}")]
    ListUnread(#[from] SourceError),

    #[error("Destination {destination} unavailable: {source}")]
    Destination {
        destination: String,
        #[source]
        source: StoreError,
    },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
