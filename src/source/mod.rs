//! Message sources: where unread support messages come from.

pub mod imap;

pub use imap::{ImapConfig, ImapSource};

use async_trait::async_trait;

use crate::error::SourceError;
use crate::pipeline::types::RawMessage;

/// A mailbox with per-message read state.
///
/// Identifiers are opaque to the pipeline; they only need to round-trip
/// between `list_unread`, `get_content` and `mark_read`.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Up to `max` unread message identifiers, oldest first.
    async fn list_unread(&self, max: usize) -> Result<Vec<String>, SourceError>;

    /// Resolve one identifier into a normalized message. Must not change
    /// the message's read state.
    async fn get_content(&self, id: &str) -> Result<RawMessage, SourceError>;

    /// Mark one message read.
    async fn mark_read(&self, id: &str) -> Result<(), SourceError>;
}
