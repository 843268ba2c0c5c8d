//! Centralized contamination detection.
//!
//! Contamination is any symptom that the agent has stopped behaving as
//! itself: an identity prefix (`@name:`), a role-reversal statement, bot
//! behavior leaking through. The pattern set stays minimal on purpose —
//! block actual failures, not normal conversation — and is extended per
//! agent (DB field) and per deployment (env/config).

use std::sync::Arc;

use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use tracing::{info, warn};

/// Base patterns applied to every agent.
const BASE_PATTERNS: &[&str] = &[
    // Identity prefix leakage.
    r"^@\w+:\s*",
    r"^@[a-z]{3,}:",
    // Explicit role confusion.
    r"sua função é atuar como um representante",
    r"your role is to act as",
    r"(minha|sua) função é atuar como",
];

pub struct ContaminationDetector {
    /// (source pattern, compiled regex) pairs; the source string is what
    /// gets reported and persisted on a hit.
    patterns: Vec<(String, Regex)>,
}

impl ContaminationDetector {
    /// Build from the base set plus per-agent and deployment extensions.
    /// Invalid extension patterns are skipped with a warning rather than
    /// taking the detector down.
    pub fn new(agent_patterns: &[String], extra_patterns: &[String]) -> Self {
        let mut patterns = Vec::new();
        for source in BASE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(agent_patterns.iter().cloned())
            .chain(extra_patterns.iter().cloned())
        {
            match RegexBuilder::new(&source).case_insensitive(true).build() {
                Ok(regex) => patterns.push((source, regex)),
                Err(e) => warn!(pattern = %source, error = %e, "invalid contamination pattern"),
            }
        }
        Self { patterns }
    }

    /// Returns the matched pattern when `text` is contaminated.
    pub fn check(&self, text: &str) -> Option<&str> {
        if text.is_empty() {
            return None;
        }
        for (source, regex) in &self.patterns {
            if regex.is_match(text) {
                let preview: String = text.chars().take(100).collect();
                warn!(pattern = %source, preview = %preview, "contamination detected");
                return Some(source);
            }
        }
        None
    }

    pub fn is_contaminated(&self, text: &str) -> bool {
        self.check(text).is_some()
    }

    /// Best-effort prefix cleanup (`@AgentName: hello` → `hello`). Not a
    /// substitute for blocking.
    pub fn clean_response(&self, text: &str) -> String {
        let cleaned = PREFIX_RE.replace(text, "").trim().to_string();
        if cleaned != text {
            info!("stripped identity prefix from response");
        }
        cleaned
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

static PREFIX_RE: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    RegexBuilder::new(r"^@?\w+:\s*")
        .case_insensitive(true)
        .build()
        .expect("prefix pattern")
});

/// Per-agent detector cache: agent patterns rarely change, regex
/// compilation isn't free, and the detector is hit on every reply.
pub struct DetectorCache {
    extra_patterns: Vec<String>,
    detectors: DashMap<i64, Arc<ContaminationDetector>>,
}

impl DetectorCache {
    pub fn new(extra_patterns: Vec<String>) -> Self {
        Self {
            extra_patterns,
            detectors: DashMap::new(),
        }
    }

    pub fn for_agent(&self, agent_id: i64, agent_patterns: &[String]) -> Arc<ContaminationDetector> {
        self.detectors
            .entry(agent_id)
            .or_insert_with(|| {
                Arc::new(ContaminationDetector::new(
                    agent_patterns,
                    &self.extra_patterns,
                ))
            })
            .clone()
    }

    pub fn invalidate(&self, agent_id: i64) {
        self.detectors.remove(&agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ContaminationDetector {
        ContaminationDetector::new(&[], &[])
    }

    #[test]
    fn flags_identity_prefix() {
        let d = detector();
        let hit = d.check("@movl: Compreendido, vou ajudá-lo...").unwrap();
        assert_eq!(hit, r"^@\w+:\s*");
    }

    #[test]
    fn flags_role_reversal() {
        let d = detector();
        assert!(d.is_contaminated("Sua função é atuar como um representante da empresa"));
        assert!(d.is_contaminated("Your role is to act as a customer service agent"));
    }

    #[test]
    fn normal_conversation_passes() {
        let d = detector();
        assert!(d.check("Perfeito, obrigado!").is_none());
        assert!(d.check("Seu pedido está em trânsito.").is_none());
        // An email mid-sentence is not a prefix hit.
        assert!(d.check("escreva para suporte@exemplo.com: ok?").is_none());
    }

    #[test]
    fn clean_strips_prefix() {
        let d = detector();
        assert_eq!(d.clean_response("@bot: tudo certo"), "tudo certo");
        assert_eq!(d.clean_response("tudo certo"), "tudo certo");
    }

    #[test]
    fn agent_and_extra_patterns_extend_base() {
        let d = ContaminationDetector::new(
            &[r"menu principal".to_string()],
            &[r"\bavaliação do atendimento\b".to_string()],
        );
        assert!(d.is_contaminated("Voltando ao MENU PRINCIPAL"));
        assert!(d.is_contaminated("deixe sua avaliação do atendimento"));
        assert_eq!(d.pattern_count(), BASE_PATTERNS.len() + 2);
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let d = ContaminationDetector::new(&["([unclosed".to_string()], &[]);
        assert_eq!(d.pattern_count(), BASE_PATTERNS.len());
    }

    #[test]
    fn cache_reuses_detectors() {
        let cache = DetectorCache::new(vec![]);
        let a = cache.for_agent(1, &[]);
        let b = cache.for_agent(1, &[]);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
