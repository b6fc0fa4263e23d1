//! Shared types for the triage pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::taxonomy::Taxonomy;

// ── Inbound message ─────────────────────────────────────────────────

/// A message resolved from the mailbox.
///
/// `id` is opaque to the pipeline; the source adapter decides what it means
/// (an IMAP UID for the shipped adapter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub id: String,
    pub subject: String,
    pub body: String,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            body: body.into(),
        }
    }
}

// ── Classification enums ────────────────────────────────────────────

/// Ticket category. Declaration order is display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Technical,
    Administrative,
    Access,
    GeneralSupport,
    TechnicalFault,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Technical,
        Category::Administrative,
        Category::Access,
        Category::GeneralSupport,
        Category::TechnicalFault,
    ];

    /// Position in `ALL`, used to index label tables.
    pub fn index(self) -> usize {
        match self {
            Self::Technical => 0,
            Self::Administrative => 1,
            Self::Access => 2,
            Self::GeneralSupport => 3,
            Self::TechnicalFault => 4,
        }
    }
}

/// Ticket urgency, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Critical,
    Elevated,
    Moderate,
    Low,
    Trivial,
}

impl Urgency {
    pub const ALL: [Urgency; 5] = [
        Urgency::Critical,
        Urgency::Elevated,
        Urgency::Moderate,
        Urgency::Low,
        Urgency::Trivial,
    ];

    pub fn index(self) -> usize {
        match self {
            Self::Critical => 0,
            Self::Elevated => 1,
            Self::Moderate => 2,
            Self::Low => 3,
            Self::Trivial => 4,
        }
    }
}

// ── Verdict ─────────────────────────────────────────────────────────

/// Placeholder used whenever a summary would otherwise be empty.
pub const SUMMARY_PLACEHOLDER: &str = "Synthèse non disponible";

/// Where a verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOrigin {
    /// Remote model answer, validated and normalized.
    Model,
    /// Keyword rules (model disabled, failed, or unparsable).
    Fallback,
}

impl VerdictOrigin {
    /// Value written to the store's origin column.
    pub fn label(self) -> &'static str {
        match self {
            Self::Model => "modèle",
            Self::Fallback => "règles",
        }
    }
}

/// Normalized classification result.
///
/// Only constructed through [`Verdict::new`], which enforces a non-empty
/// summary. Category and urgency are enum members by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    category: Category,
    urgency: Urgency,
    summary: String,
    origin: VerdictOrigin,
}

impl Verdict {
    pub fn new(
        category: Category,
        urgency: Urgency,
        summary: impl Into<String>,
        origin: VerdictOrigin,
    ) -> Self {
        let summary = summary.into();
        let summary = if summary.trim().is_empty() {
            SUMMARY_PLACEHOLDER.to_string()
        } else {
            summary.trim().to_string()
        };
        Self {
            category,
            urgency,
            summary,
            origin,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn urgency(&self) -> Urgency {
        self.urgency
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn origin(&self) -> VerdictOrigin {
        self.origin
    }
}

// ── Classified message ──────────────────────────────────────────────

/// Column headers of the destination, in row order.
pub const ROW_HEADER: [&str; 7] = [
    "Identifiant",
    "Sujet",
    "Catégorie",
    "Urgence",
    "Synthèse",
    "Origine",
    "Traité le",
];

/// A message paired with its verdict: the unit written to the store.
#[derive(Debug, Clone)]
pub struct ClassifiedMessage {
    pub message: RawMessage,
    pub verdict: Verdict,
    pub processed_at: DateTime<Utc>,
}

impl ClassifiedMessage {
    pub fn new(message: RawMessage, verdict: Verdict) -> Self {
        Self {
            message,
            verdict,
            processed_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }

    /// Render the store row, matching [`ROW_HEADER`].
    pub fn to_row(&self, taxonomy: &Taxonomy) -> Vec<String> {
        vec![
            self.message.id.clone(),
            self.message.subject.clone(),
            taxonomy.category_label(self.verdict.category()).to_string(),
            taxonomy.urgency_label(self.verdict.urgency()).to_string(),
            self.verdict.summary().to_string(),
            self.verdict.origin().label().to_string(),
            self.processed_at.to_rfc3339(),
        ]
    }
}

// ── Run summary ─────────────────────────────────────────────────────

/// Counters for one pipeline run. Rebuilt every run, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Unread ids returned by the source.
    pub attempted: usize,
    /// Rows appended to the store.
    pub written: usize,
    pub marked_read: usize,
    /// Content fetch failures plus messages left without a verdict.
    pub failed_to_classify: usize,
    pub failed_to_write: usize,
    pub failed_to_mark_read: usize,
    /// Chunks started.
    pub chunks: usize,
    /// Verdicts produced by the keyword rules.
    pub fallback_verdicts: usize,
    /// Run stopped early by a shutdown request.
    pub interrupted: bool,
    /// Run classified without writing or marking anything.
    pub dry_run: bool,
}

impl BatchResult {
    /// Total messages that did not make it all the way through.
    pub fn failed(&self) -> usize {
        self.failed_to_classify + self.failed_to_write + self.failed_to_mark_read
    }

    pub fn merge(&mut self, other: &BatchResult) {
        self.attempted += other.attempted;
        self.written += other.written;
        self.marked_read += other.marked_read;
        self.failed_to_classify += other.failed_to_classify;
        self.failed_to_write += other.failed_to_write;
        self.failed_to_mark_read += other.failed_to_mark_read;
        self.chunks += other.chunks;
        self.fallback_verdicts += other.fallback_verdicts;
        self.interrupted |= other.interrupted;
        self.dry_run |= other.dry_run;
    }
}
