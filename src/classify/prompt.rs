//! Prompt construction for the classification call.

use crate::classify::taxonomy::Taxonomy;

/// System prompt: output contract only, the allowed values go in the user prompt.
pub fn build_system_prompt() -> String {
    "Tu es un assistant expert en classification de tickets de support reçus par e-mail.\n\
     Tu réponds UNIQUEMENT avec un objet JSON valide, sans texte supplémentaire, \
     avec exactement les clés \"category\", \"urgency\" et \"summary\".\n\
     Règles:\n\
     - \"category\" et \"urgency\" reprennent mot pour mot une des valeurs proposées\n\
     - utilise la plus haute urgence uniquement pour les problèmes bloquants\n\
     - \"summary\" est un résumé de 2 à 3 lignes en français"
        .to_string()
}

/// User prompt with the allowed labels and a bounded body prefix.
pub fn build_user_prompt(
    taxonomy: &Taxonomy,
    subject: &str,
    body: &str,
    body_prefix_chars: usize,
) -> String {
    let body_preview: String = body.chars().take(body_prefix_chars).collect();

    let mut prompt = String::with_capacity(256 + body_preview.len());
    prompt.push_str("Analyse ce ticket et réponds en JSON:\n");
    prompt.push_str(&format!(
        "- \"category\": une des valeurs suivantes: {}\n",
        taxonomy.category_labels().join(", ")
    ));
    prompt.push_str(&format!(
        "- \"urgency\": une des valeurs suivantes: {}\n",
        taxonomy.urgency_labels().join(", ")
    ));
    prompt.push_str("- \"summary\": un résumé court\n\n");
    prompt.push_str(&format!("Sujet: {subject}\n\n"));
    prompt.push_str(&format!("Corps:\n{body_preview}"));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_the_fields() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("\"category\""));
        assert!(prompt.contains("\"urgency\""));
        assert!(prompt.contains("\"summary\""));
    }

    #[test]
    fn user_prompt_lists_every_label() {
        let taxonomy = Taxonomy::default();
        let prompt = build_user_prompt(&taxonomy, "Accès bloqué", "Je ne peux plus me connecter", 2000);
        for label in taxonomy.category_labels().iter().chain(taxonomy.urgency_labels()) {
            assert!(prompt.contains(label.as_str()), "missing {label}");
        }
        assert!(prompt.contains("Accès bloqué"));
        assert!(prompt.contains("Je ne peux plus me connecter"));
    }

    #[test]
    fn user_prompt_truncates_body_by_chars() {
        let taxonomy = Taxonomy::default();
        let body = "à".repeat(5000);
        let prompt = build_user_prompt(&taxonomy, "s", &body, 1000);
        assert_eq!(prompt.chars().filter(|c| *c == 'à').count(), 1000);
    }
}
