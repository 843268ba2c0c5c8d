//! Interactive-menu selection.
//!
//! WhatsApp bots send lists and button menus as JSON payloads. Instead of
//! asking the LLM to pick, the engine ranks option titles against the
//! thread objective: a tracking-number match wins outright, a remembered
//! previous selection on the identical menu is avoided, and an
//! "Outro"/"Other" row is the standing fallback.

use std::sync::LazyLock;

use regex::Regex;

const DEFAULT_KEYWORDS: &[&str] = &[
    "rastreio",
    "rastreamento",
    "rastrear",
    "pedido",
    "encomenda",
    "entrega",
    "status",
    "logístico",
    "logistica",
    "consultar",
    "consulta",
];

static TRACKING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{10,18}\b").expect("tracking pattern"));
static FALLBACK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(outro|outra|other|none of the above|nenhum|nenhuma)\b")
        .expect("fallback pattern")
});
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\w+\b").expect("token pattern"));

fn load_interactive_payload(message: &str) -> Option<serde_json::Value> {
    let trimmed = message.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let payload: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    payload.is_object().then_some(payload)
}

fn extract_option_titles(payload: &serde_json::Value) -> Vec<String> {
    let mut options = Vec::new();

    if let Some(buttons) = payload["buttons"].as_array() {
        for button in buttons {
            if let Some(title) = button["title"].as_str() {
                options.push(title.to_string());
            }
        }
    }
    if let Some(sections) = payload["sections"].as_array() {
        for section in sections {
            if let Some(rows) = section["rows"].as_array() {
                for row in rows {
                    if let Some(title) = row["title"].as_str() {
                        options.push(title.to_string());
                    }
                }
            }
        }
    }
    options
}

/// A stable signature of the menu (type, texts, options) so a recurring
/// identical menu can be recognized across turns.
pub fn menu_signature(message: &str) -> Option<String> {
    let payload = load_interactive_payload(message)?;
    let options = extract_option_titles(&payload);
    if options.is_empty() {
        return None;
    }

    let mut parts: Vec<String> = Vec::new();
    for key in ["type", "header", "body", "footer"] {
        if let Some(v) = payload[key].as_str() {
            if !v.is_empty() {
                parts.push(v.to_string());
            }
        }
    }
    parts.extend(options);
    Some(parts.join("|"))
}

fn find_tracking_number(objective: &str) -> Option<&str> {
    TRACKING_RE.find(objective).map(|m| m.as_str())
}

fn objective_keywords(objective: &str) -> Vec<String> {
    let mut keywords: Vec<String> = DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect();
    for token in TOKEN_RE.find_iter(&objective.to_lowercase()) {
        let token = token.as_str();
        if token.len() >= 4 && !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }
    keywords
}

fn rank_options(options: &[String], keywords: &[String]) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> = options
        .iter()
        .map(|option| {
            let lower = option.to_lowercase();
            let score = keywords.iter().filter(|k| lower.contains(k.as_str())).count();
            (score, option)
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .filter(|(score, _)| *score > 0)
        .map(|(_, option)| option.clone())
        .collect()
}

/// Pick the reply for an interactive payload, or `None` when the message is
/// not an interactive menu.
pub fn choose_interactive_option(
    message: &str,
    objective: &str,
    last_selection: Option<&str>,
) -> Option<String> {
    let payload = load_interactive_payload(message)?;

    let payload_type = payload["type"].as_str().unwrap_or_default();
    let typed = matches!(payload_type, "list" | "buttons" | "interactive");
    let has_options_shape =
        payload["sections"].is_array() || payload["buttons"].is_array();
    if !typed && !has_options_shape {
        return None;
    }

    let options = extract_option_titles(&payload);
    if options.is_empty() {
        return None;
    }

    // Tracking number in the objective wins outright.
    if let Some(tracking) = find_tracking_number(objective) {
        if let Some(option) = options.iter().find(|o| o.contains(tracking)) {
            return Some(option.clone());
        }
    }

    let fallback = options.iter().find(|o| FALLBACK_RE.is_match(o)).cloned();
    let ranked = rank_options(&options, &objective_keywords(objective));

    // The same menu came back: do not repeat the previous selection.
    if let Some(last) = last_selection {
        if let Some(fb) = &fallback {
            if fb != last {
                return Some(fb.clone());
            }
        }
        if let Some(option) = ranked.iter().find(|o| o.as_str() != last) {
            return Some(option.clone());
        }
        return options.iter().find(|o| o.as_str() != last).cloned();
    }

    if let Some(fb) = fallback {
        return Some(fb);
    }
    ranked.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_WITH_TRACKING: &str = r#"{"type":"list","sections":[{"rows":[{"title":"Outro"},{"title":"1234567890123 — em trânsito"}]}]}"#;

    #[test]
    fn tracking_number_match_wins() {
        let choice = choose_interactive_option(
            LIST_WITH_TRACKING,
            "obter status rastreio 1234567890123",
            None,
        )
        .unwrap();
        assert_eq!(choice, "1234567890123 — em trânsito");
    }

    #[test]
    fn fallback_row_is_chosen_without_a_match() {
        let menu = r#"{"type":"list","sections":[{"rows":[{"title":"Segunda via de boleto"},{"title":"Outro assunto"}]}]}"#;
        let choice =
            choose_interactive_option(menu, "falar sobre meu contrato", None).unwrap();
        assert_eq!(choice, "Outro assunto");
    }

    #[test]
    fn keyword_overlap_ranks_options() {
        let menu = r#"{"type":"buttons","buttons":[{"title":"Falar com atendente"},{"title":"Rastrear pedido"}]}"#;
        let choice = choose_interactive_option(menu, "rastrear a encomenda 99", None).unwrap();
        assert_eq!(choice, "Rastrear pedido");
    }

    #[test]
    fn repeated_menu_avoids_previous_selection() {
        let menu = r#"{"type":"buttons","buttons":[{"title":"Rastrear pedido"},{"title":"Falar com atendente"}]}"#;
        let choice =
            choose_interactive_option(menu, "rastrear pedido", Some("Rastrear pedido")).unwrap();
        assert_eq!(choice, "Falar com atendente");
    }

    #[test]
    fn plain_text_is_not_a_menu() {
        assert!(choose_interactive_option("bom dia!", "qualquer objetivo", None).is_none());
        assert!(choose_interactive_option(r#"{"type":"text"}"#, "obj", None).is_none());
    }

    #[test]
    fn signature_is_stable_and_distinguishes_menus() {
        let a = menu_signature(LIST_WITH_TRACKING).unwrap();
        let b = menu_signature(LIST_WITH_TRACKING).unwrap();
        assert_eq!(a, b);

        let other = menu_signature(
            r#"{"type":"buttons","buttons":[{"title":"Sim"},{"title":"Não"}]}"#,
        )
        .unwrap();
        assert_ne!(a, other);
    }
}
