//! Batch orchestrator: FETCH → (CLASSIFY → WRITE → MARK_READ)* → SUMMARIZE.
//!
//! A message is marked read only after the chunk holding its row has been
//! appended. Anything that fails leaves the message unread, so the next run
//! picks it up again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::classify::{Classify, Taxonomy};
use crate::error::PipelineError;
use crate::pipeline::types::{BatchResult, ClassifiedMessage, VerdictOrigin};
use crate::source::MessageSource;
use crate::store::ResultStore;

/// Run-level settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Sheet or table the rows go to.
    pub destination: String,
    /// Unread ids requested per run.
    pub max_results: usize,
    pub chunk_size: usize,
    /// Pause between two chunks.
    pub chunk_delay: Duration,
    /// Classify and log only.
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            destination: "Tickets".to_string(),
            max_results: 100,
            chunk_size: 20,
            chunk_delay: Duration::from_secs(1),
            dry_run: false,
        }
    }
}

/// Drives one triage run over its collaborators.
pub struct Orchestrator {
    source: Arc<dyn MessageSource>,
    classifier: Arc<dyn Classify>,
    store: Arc<dyn ResultStore>,
    taxonomy: Arc<Taxonomy>,
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn MessageSource>,
        classifier: Arc<dyn Classify>,
        store: Arc<dyn ResultStore>,
        taxonomy: Arc<Taxonomy>,
        config: PipelineConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            classifier,
            store,
            taxonomy,
            config,
            shutdown,
        }
    }

    /// Run once. Only a failure to prepare the destination or to list unread
    /// messages aborts the run; everything else is counted.
    pub async fn run(&self) -> Result<BatchResult, PipelineError> {
        let run_id = Uuid::new_v4();
        self.run_inner()
            .instrument(info_span!("triage_run", run_id = %run_id))
            .await
    }

    async fn run_inner(&self) -> Result<BatchResult, PipelineError> {
        let mut result = BatchResult {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        if self.config.dry_run {
            info!("Dry run: nothing will be written or marked read");
        } else {
            self.store
                .ensure_destination(&self.config.destination)
                .await
                .map_err(|source| {
                    error!(destination = %self.config.destination, error = %source, "Destination unavailable");
                    PipelineError::Destination {
                        destination: self.config.destination.clone(),
                        source,
                    }
                })?;
        }

        let ids = self
            .source
            .list_unread(self.config.max_results)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to list unread messages"))?;

        result.attempted = ids.len();
        if ids.is_empty() {
            info!("No unread messages");
            log_summary(&result);
            return Ok(result);
        }

        let chunk_size = self.config.chunk_size.max(1);
        let total_chunks = ids.len().div_ceil(chunk_size);
        info!(unread = ids.len(), chunks = total_chunks, "Starting triage");

        for (index, chunk) in ids.chunks(chunk_size).enumerate() {
            if index > 0 && !self.config.chunk_delay.is_zero() && !self.stop_requested() {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
            if self.stop_requested() {
                warn!(
                    completed_chunks = index,
                    remaining = ids.len() - index * chunk_size,
                    "Shutdown requested, stopping before next chunk"
                );
                result.interrupted = true;
                break;
            }

            result.chunks += 1;
            let chunk_result = self.process_chunk(index + 1, total_chunks, chunk).await;
            result.merge(&chunk_result);
        }

        log_summary(&result);
        Ok(result)
    }

    fn stop_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    async fn process_chunk(&self, number: usize, total: usize, ids: &[String]) -> BatchResult {
        let mut result = BatchResult::default();
        info!(chunk = number, of = total, size = ids.len(), "Processing chunk");

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            match self.source.get_content(id).await {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to fetch message, leaving it unread");
                    result.failed_to_classify += 1;
                }
            }
        }
        if messages.is_empty() {
            return result;
        }

        let verdicts = self.classifier.classify_batch(&messages).await;
        if verdicts.len() != messages.len() {
            warn!(
                messages = messages.len(),
                verdicts = verdicts.len(),
                "Verdict count mismatch, pairing the common prefix"
            );
        }
        result.failed_to_classify += messages.len().saturating_sub(verdicts.len());

        let classified: Vec<ClassifiedMessage> = messages
            .into_iter()
            .zip(verdicts)
            .map(|(message, verdict)| ClassifiedMessage::new(message, verdict))
            .collect();
        result.fallback_verdicts += classified
            .iter()
            .filter(|c| c.verdict.origin() == VerdictOrigin::Fallback)
            .count();
        if classified.is_empty() {
            return result;
        }

        if self.config.dry_run {
            for c in &classified {
                info!(
                    id = %c.id(),
                    subject = %c.message.subject,
                    category = self.taxonomy.category_label(c.verdict.category()),
                    urgency = self.taxonomy.urgency_label(c.verdict.urgency()),
                    origin = c.verdict.origin().label(),
                    summary = %c.verdict.summary(),
                    "Dry run: row not written"
                );
            }
            return result;
        }

        let rows: Vec<Vec<String>> = classified
            .iter()
            .map(|c| c.to_row(&self.taxonomy))
            .collect();
        match self.store.append_rows(&self.config.destination, &rows).await {
            Ok(range) => {
                result.written += classified.len();
                info!(rows = rows.len(), range = %range, "Chunk written");
            }
            Err(e) => {
                error!(
                    rows = rows.len(),
                    error = %e,
                    "Failed to write chunk, leaving its messages unread"
                );
                result.failed_to_write += classified.len();
                return result;
            }
        }

        for c in &classified {
            match self.source.mark_read(c.id()).await {
                Ok(()) => {
                    result.marked_read += 1;
                    debug!(id = %c.id(), "Marked read");
                }
                Err(e) => {
                    warn!(id = %c.id(), error = %e, "Row written but message not marked read");
                    result.failed_to_mark_read += 1;
                }
            }
        }
        result
    }
}

fn log_summary(result: &BatchResult) {
    info!(
        attempted = result.attempted,
        written = result.written,
        marked_read = result.marked_read,
        failed_to_classify = result.failed_to_classify,
        failed_to_write = result.failed_to_write,
        failed_to_mark_read = result.failed_to_mark_read,
        chunks = result.chunks,
        fallback_verdicts = result.fallback_verdicts,
        interrupted = result.interrupted,
        dry_run = result.dry_run,
        "Triage run complete"
    );
}
