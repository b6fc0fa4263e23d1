//! Category/urgency labels and free-text normalization.
//!
//! The enum members are fixed; only their display labels are configurable.
//! `normalize` maps whatever the model answered onto a member:
//! exact label → alias table (case-insensitive) → substring containment →
//! default. It is pure so it can be tested without any network call.

use crate::error::ConfigError;
use crate::pipeline::types::{Category, Urgency};

/// Default category labels, in `Category::ALL` order.
pub const DEFAULT_CATEGORY_LABELS: [&str; 5] = [
    "Technique",
    "Administratif",
    "Accès/Authentification",
    "Support utilisateur",
    "Bug/Dysfonctionnement",
];

/// Default urgency labels, in `Urgency::ALL` order.
pub const DEFAULT_URGENCY_LABELS: [&str; 5] = ["Critique", "Élevée", "Modérée", "Faible", "Anodine"];

/// Synonyms the model tends to answer with instead of the configured label.
const CATEGORY_ALIASES: &[(&str, Category)] = &[
    ("technical", Category::Technical),
    ("tech", Category::Technical),
    ("administrative", Category::Administrative),
    ("admin", Category::Administrative),
    ("billing", Category::Administrative),
    ("facturation", Category::Administrative),
    ("invoice", Category::Administrative),
    ("access", Category::Access),
    ("accès", Category::Access),
    ("acces", Category::Access),
    ("authentication", Category::Access),
    ("login", Category::Access),
    ("support", Category::GeneralSupport),
    ("user support", Category::GeneralSupport),
    ("general", Category::GeneralSupport),
    ("autre", Category::GeneralSupport),
    ("other", Category::GeneralSupport),
    ("bug", Category::TechnicalFault),
    ("dysfonctionnement", Category::TechnicalFault),
    ("malfunction", Category::TechnicalFault),
    ("technical fault", Category::TechnicalFault),
];

const URGENCY_ALIASES: &[(&str, Urgency)] = &[
    ("critical", Urgency::Critical),
    ("urgent", Urgency::Critical),
    ("urgente", Urgency::Critical),
    ("high", Urgency::Elevated),
    ("haute", Urgency::Elevated),
    ("elevated", Urgency::Elevated),
    ("élevé", Urgency::Elevated),
    ("elevee", Urgency::Elevated),
    ("medium", Urgency::Moderate),
    ("moyenne", Urgency::Moderate),
    ("normale", Urgency::Moderate),
    ("moderate", Urgency::Moderate),
    ("moderee", Urgency::Moderate),
    ("low", Urgency::Low),
    ("basse", Urgency::Low),
    ("trivial", Urgency::Trivial),
    ("anodin", Urgency::Trivial),
    ("negligible", Urgency::Trivial),
];

/// Which normalization phase produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Alias,
    Substring,
    Defaulted,
}

/// A normalized value plus how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalized<T> {
    pub value: T,
    pub kind: MatchKind,
}

/// Map free text onto one of `members`.
///
/// `labels[i]` is the display label of `members[i]`. Substring matching walks
/// members in order and the first hit wins. Blank input is never matched.
pub fn normalize<T: Copy>(
    raw: &str,
    members: &[T],
    labels: &[String],
    aliases: &[(&str, T)],
    default: T,
) -> Normalized<T> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Normalized {
            value: default,
            kind: MatchKind::Defaulted,
        };
    }

    if let Some(i) = labels.iter().position(|l| l == trimmed) {
        return Normalized {
            value: members[i],
            kind: MatchKind::Exact,
        };
    }

    let lower = trimmed.to_lowercase();

    if let Some(i) = labels.iter().position(|l| l.to_lowercase() == lower) {
        return Normalized {
            value: members[i],
            kind: MatchKind::Alias,
        };
    }
    if let Some((_, value)) = aliases.iter().find(|(alias, _)| *alias == lower) {
        return Normalized {
            value: *value,
            kind: MatchKind::Alias,
        };
    }

    if let Some(i) = labels.iter().position(|l| {
        let l = l.to_lowercase();
        l.contains(&lower) || lower.contains(&l)
    }) {
        return Normalized {
            value: members[i],
            kind: MatchKind::Substring,
        };
    }

    Normalized {
        value: default,
        kind: MatchKind::Defaulted,
    }
}

/// Display labels and defaults for both enumerations.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    category_labels: Vec<String>,
    urgency_labels: Vec<String>,
    default_category: Category,
    default_urgency: Urgency,
}

impl Default for Taxonomy {
    fn default() -> Self {
        Self {
            category_labels: DEFAULT_CATEGORY_LABELS.iter().map(|s| s.to_string()).collect(),
            urgency_labels: DEFAULT_URGENCY_LABELS.iter().map(|s| s.to_string()).collect(),
            default_category: Category::GeneralSupport,
            default_urgency: Urgency::Moderate,
        }
    }
}

impl Taxonomy {
    /// Build a taxonomy with custom labels.
    ///
    /// Each list must have one non-empty, distinct label per enum member, in
    /// enum order.
    pub fn with_labels(
        category_labels: Vec<String>,
        urgency_labels: Vec<String>,
    ) -> Result<Self, ConfigError> {
        validate_labels("TRIAGE_CATEGORY_LABELS", &category_labels, Category::ALL.len())?;
        validate_labels("TRIAGE_URGENCY_LABELS", &urgency_labels, Urgency::ALL.len())?;
        Ok(Self {
            category_labels,
            urgency_labels,
            ..Self::default()
        })
    }

    pub fn category_label(&self, category: Category) -> &str {
        &self.category_labels[category.index()]
    }

    pub fn urgency_label(&self, urgency: Urgency) -> &str {
        &self.urgency_labels[urgency.index()]
    }

    pub fn category_labels(&self) -> &[String] {
        &self.category_labels
    }

    pub fn urgency_labels(&self) -> &[String] {
        &self.urgency_labels
    }

    pub fn normalize_category(&self, raw: &str) -> Normalized<Category> {
        normalize(
            raw,
            &Category::ALL,
            &self.category_labels,
            CATEGORY_ALIASES,
            self.default_category,
        )
    }

    pub fn normalize_urgency(&self, raw: &str) -> Normalized<Urgency> {
        normalize(
            raw,
            &Urgency::ALL,
            &self.urgency_labels,
            URGENCY_ALIASES,
            self.default_urgency,
        )
    }
}

fn validate_labels(key: &str, labels: &[String], expected: usize) -> Result<(), ConfigError> {
    if labels.len() != expected {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected {expected} labels, got {}", labels.len()),
        });
    }
    if labels.iter().any(|l| l.trim().is_empty()) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "labels must not be empty".to_string(),
        });
    }
    for (i, label) in labels.iter().enumerate() {
        if labels[..i].iter().any(|l| l.to_lowercase() == label.to_lowercase()) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("duplicate label '{label}'"),
            });
        }
    }
    Ok(())
}
