//! Keyword classifier used when the model is unavailable.
//!
//! Rules are checked in order over the lower-cased `subject + " " + body`;
//! the first rule with any matching trigger wins.

use crate::pipeline::types::{Category, Urgency, Verdict, VerdictOrigin};

const CATEGORY_RULES: &[(Category, &[&str])] = &[
    (
        Category::TechnicalFault,
        &["bug", "erreur", "dysfonctionnement", "ne fonctionne pas", "crash"],
    ),
    (
        Category::Access,
        &["accès", "authentification", "login", "mot de passe", "compte"],
    ),
    (Category::Technical, &["technique", "serveur", "api", "code"]),
    (
        Category::Administrative,
        &["administratif", "facture", "paiement", "contrat"],
    ),
];

const URGENCY_RULES: &[(Urgency, &[&str])] = &[
    (Urgency::Critical, &["urgent", "critique", "bloquant", "immédiat"]),
    (Urgency::Elevated, &["important", "priorité", "rapide"]),
    (Urgency::Trivial, &["pas urgent", "quand possible", "anodin"]),
];

/// Body characters quoted in a fallback summary.
const SUMMARY_BODY_CHARS: usize = 100;

fn first_match<T: Copy>(text: &str, rules: &[(T, &[&str])], default: T) -> T {
    rules
        .iter()
        .find(|(_, triggers)| triggers.iter().any(|t| text.contains(t)))
        .map(|(value, _)| *value)
        .unwrap_or(default)
}

pub fn fallback_category(text: &str) -> Category {
    first_match(text, CATEGORY_RULES, Category::GeneralSupport)
}

pub fn fallback_urgency(text: &str) -> Urgency {
    first_match(text, URGENCY_RULES, Urgency::Moderate)
}

/// Fixed-format summary from the subject and the start of the body.
pub fn fallback_summary(subject: &str, body: &str) -> String {
    if body.chars().count() > SUMMARY_BODY_CHARS {
        let preview: String = body.chars().take(SUMMARY_BODY_CHARS).collect();
        format!("Ticket concernant: {subject}. {preview}...")
    } else {
        format!("Ticket: {subject}")
    }
}

/// Classify with keyword rules only. Deterministic and infallible.
pub fn classify_by_rules(subject: &str, body: &str) -> Verdict {
    let text = format!("{subject} {body}").to_lowercase();
    Verdict::new(
        fallback_category(&text),
        fallback_urgency(&text),
        fallback_summary(subject, body),
        VerdictOrigin::Fallback,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category_of(subject: &str, body: &str) -> Category {
        classify_by_rules(subject, body).category()
    }

    fn urgency_of(subject: &str, body: &str) -> Urgency {
        classify_by_rules(subject, body).urgency()
    }

    #[test]
    fn category_triggers() {
        for trigger in ["bug", "erreur", "dysfonctionnement", "ne fonctionne pas", "crash"] {
            assert_eq!(category_of("", trigger), Category::TechnicalFault, "{trigger}");
        }
        for trigger in ["accès", "authentification", "login", "mot de passe", "compte"] {
            assert_eq!(category_of("", trigger), Category::Access, "{trigger}");
        }
        for trigger in ["technique", "serveur", "api", "code"] {
            assert_eq!(category_of("", trigger), Category::Technical, "{trigger}");
        }
        for trigger in ["administratif", "facture", "paiement", "contrat"] {
            assert_eq!(category_of("", trigger), Category::Administrative, "{trigger}");
        }
        assert_eq!(category_of("Bonjour", "Merci pour votre aide"), Category::GeneralSupport);
    }

    #[test]
    fn urgency_triggers() {
        for trigger in ["urgent", "critique", "bloquant", "immédiat"] {
            assert_eq!(urgency_of(trigger, ""), Urgency::Critical, "{trigger}");
        }
        for trigger in ["important", "priorité", "rapide"] {
            assert_eq!(urgency_of(trigger, ""), Urgency::Elevated, "{trigger}");
        }
        for trigger in ["quand possible", "anodin"] {
            assert_eq!(urgency_of(trigger, ""), Urgency::Trivial, "{trigger}");
        }
        assert_eq!(urgency_of("Question", "Une petite question"), Urgency::Moderate);
    }

    #[test]
    fn earlier_rules_win() {
        // "bug" beats "compte"
        assert_eq!(
            category_of("Bug sur mon compte", ""),
            Category::TechnicalFault
        );
        // "urgent" is checked before "pas urgent"
        assert_eq!(urgency_of("", "ce n'est pas urgent"), Urgency::Critical);
        // "critique" beats "important"
        assert_eq!(urgency_of("Important", "incident critique"), Urgency::Critical);
    }

    #[test]
    fn matching_is_case_insensitive_over_subject_and_body() {
        assert_eq!(category_of("MOT DE PASSE oublié", ""), Category::Access);
        assert_eq!(category_of("Hello", "Le SERVEUR est lent"), Category::Technical);
        assert_eq!(urgency_of("IMMÉDIAT", ""), Urgency::Critical);
    }

    #[test]
    fn subject_and_body_are_joined_with_a_space() {
        // "mot" + "de passe" only matches across the joining space
        assert_eq!(category_of("mot", "de passe"), Category::Access);
    }

    #[test]
    fn summary_short_body() {
        assert_eq!(fallback_summary("Imprimante", "HS"), "Ticket: Imprimante");
    }

    #[test]
    fn summary_long_body_is_truncated_by_chars() {
        let body = "é".repeat(150);
        let summary = fallback_summary("Sujet", &body);
        assert!(summary.starts_with("Ticket concernant: Sujet. "));
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().filter(|c| *c == 'é').count(), 100);
    }

    #[test]
    fn fallback_verdict_is_marked_and_never_empty() {
        let v = classify_by_rules("", "");
        assert_eq!(v.origin(), VerdictOrigin::Fallback);
        assert!(!v.summary().is_empty());
        assert_eq!(v.category(), Category::GeneralSupport);
        assert_eq!(v.urgency(), Urgency::Moderate);
    }
}
