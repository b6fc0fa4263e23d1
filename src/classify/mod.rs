//! Message classification.
//!
//! A remote model proposes a category, urgency and summary; its answer is
//! normalized onto the fixed [`taxonomy`]. Anything that goes wrong falls
//! back to the keyword rules in [`fallback`].

pub mod classifier;
pub mod fallback;
pub mod pacing;
pub mod prompt;
pub mod taxonomy;

pub use classifier::{Classifier, ClassifierConfig};
pub use taxonomy::Taxonomy;

use async_trait::async_trait;

use crate::pipeline::types::{RawMessage, Verdict};

/// Batch classification seam used by the pipeline.
#[async_trait]
pub trait Classify: Send + Sync {
    /// One verdict per input message, in input order.
    async fn classify_batch(&self, messages: &[RawMessage]) -> Vec<Verdict>;
}
