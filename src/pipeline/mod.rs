//! Triage pipeline.
//!
//! Each run flows through:
//! 1. `ResultStore::ensure_destination()`: sheet/table and header exist
//! 2. `MessageSource::list_unread()`: ids to process this run
//! 3. per chunk: `get_content()` → `Classify::classify_batch()` →
//!    `ResultStore::append_rows()` → `MessageSource::mark_read()`
//! 4. a structured summary of the run's counters
//!
//! **Nothing is marked read before its row is written.**

pub mod orchestrator;
pub mod types;

pub use orchestrator::{Orchestrator, PipelineConfig};
pub use types::{BatchResult, ClassifiedMessage, RawMessage, Verdict};
