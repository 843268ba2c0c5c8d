//! Candidate-identifier expansion for WhatsApp senders.
//!
//! A single user can appear as `+5511…`, `5511…`, `5511…@s.whatsapp.net`, or
//! a business-linked `…@lid` id depending on which device replied. Thread
//! matching and contact resolution both need the full set of equivalent
//! forms.

/// Strip the JID suffix and leading `+` from a raw sender string.
pub fn normalize_sender(raw: &str) -> String {
    raw.split('@')
        .next()
        .unwrap_or(raw)
        .trim_start_matches('+')
        .to_string()
}

/// All identifier forms equivalent to `raw`, the original form first.
///
/// Deduplicated, order-preserving. Cross-lookups (phone ↔ WhatsApp business
/// id via the contact row) are layered on by the caller because they need DB
/// access.
pub fn candidate_identifiers(raw: &str) -> Vec<String> {
    let normalized = normalize_sender(raw);
    let forms = [
        raw.to_string(),
        normalized.clone(),
        format!("+{}", normalized),
        format!("{}@s.whatsapp.net", normalized),
        format!("{}@lid", normalized),
    ];

    let mut out: Vec<String> = Vec::with_capacity(forms.len());
    for f in forms {
        if !out.contains(&f) {
            out.push(f);
        }
    }
    out
}

/// Expand a secondary identifier (e.g. the paired phone for a WhatsApp
/// business id) into the same set of forms and append the new ones.
pub fn extend_with_identifier(candidates: &mut Vec<String>, identifier: &str) {
    for form in candidate_identifiers(identifier) {
        if !candidates.contains(&form) {
            candidates.push(form);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_jid_and_plus() {
        assert_eq!(normalize_sender("+5511999990000"), "5511999990000");
        assert_eq!(
            normalize_sender("5511999990000@s.whatsapp.net"),
            "5511999990000"
        );
        assert_eq!(normalize_sender("180216945205454@lid"), "180216945205454");
    }

    #[test]
    fn candidates_cover_all_forms() {
        let forms = candidate_identifiers("5511999990000@s.whatsapp.net");
        assert!(forms.contains(&"5511999990000".to_string()));
        assert!(forms.contains(&"+5511999990000".to_string()));
        assert!(forms.contains(&"5511999990000@s.whatsapp.net".to_string()));
        assert!(forms.contains(&"5511999990000@lid".to_string()));
    }

    #[test]
    fn candidates_are_deduplicated() {
        let forms = candidate_identifiers("5511999990000");
        let unique: std::collections::HashSet<_> = forms.iter().collect();
        assert_eq!(unique.len(), forms.len());
    }

    #[test]
    fn extend_appends_only_new_forms() {
        let mut forms = candidate_identifiers("5511999990000");
        let before = forms.len();
        extend_with_identifier(&mut forms, "5511999990000");
        assert_eq!(forms.len(), before);
        extend_with_identifier(&mut forms, "180216945205454");
        assert!(forms.contains(&"180216945205454@lid".to_string()));
    }
}
