//! Response post-processing: strip model reasoning, strip internal context
//! markers, and replace replies that leak system internals.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::warn;

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("sanitize pattern")
}

static THINK_BLOCK: LazyLock<Regex> = LazyLock::new(|| ci(r"<think>.*?</think>"));
static REASONING_BLOCK: LazyLock<Regex> = LazyLock::new(|| ci(r"<reasoning>.*?</reasoning>"));
static BRACKET_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"\[(?:REASONING|INTERNAL|THINKING)\].*?\[/(?:REASONING|INTERNAL|THINKING)\]")
});
static HEADING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(
        r"(?m)^[#*\s]*(?:Thinking|Reasoning|Internal|Objective|Tools Available|My Plan):.*?(?:\n\n|\z)",
    )
    .case_insensitive(true)
    .dot_matches_new_line(true)
    .build()
    .expect("heading pattern")
});
static ORPHAN_TAGS: LazyLock<Regex> = LazyLock::new(|| ci(r"</?(?:think|reasoning|thinking)>"));
static LEAKED_TOOL_BLOCK: LazyLock<Regex> = LazyLock::new(|| ci(r"```tool:.*?```"));
static EXCESS_NEWLINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n\n+").expect("newline pattern"));

/// Remove reasoning/thinking output in every format observed in the wild
/// (DeepSeek-style `<think>`, bracket blocks, Markdown headings). Tool-call
/// blocks are left intact here; the parser consumes them, and whatever it
/// could not parse is removed afterwards by
/// [`strip_leaked_tool_blocks`].
pub fn strip_reasoning_tags(text: &str) -> String {
    let mut cleaned = THINK_BLOCK.replace_all(text, "").to_string();
    cleaned = REASONING_BLOCK.replace_all(&cleaned, "").to_string();
    cleaned = BRACKET_BLOCK.replace_all(&cleaned, "").to_string();
    cleaned = HEADING_BLOCK.replace_all(&cleaned, "").to_string();
    cleaned = ORPHAN_TAGS.replace_all(&cleaned, "").to_string();
    cleaned = EXCESS_NEWLINES.replace_all(&cleaned, "\n\n").to_string();
    cleaned.trim().to_string()
}

/// Remove tool blocks that survived parsing (malformed or hallucinated) so
/// they never reach the user.
pub fn strip_leaked_tool_blocks(text: &str) -> String {
    let cleaned = LEAKED_TOOL_BLOCK.replace_all(text, "").to_string();
    EXCESS_NEWLINES
        .replace_all(&cleaned, "\n\n")
        .trim()
        .to_string()
}

static PAST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\[PAST - \d+%[^\]]*\].*?$").expect("past pattern"));
static SECTION_HEADERS: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"=== (?:Relevant Past Messages|What I Know About This User|Shared Knowledge[^=]*|Recent Conversation) ===")
});
static FACT_CATEGORY: LazyLock<Regex> = LazyLock::new(|| {
    ci(r"\[(?:COMMUNICATION_STYLE|INSTRUCTIONS|LINGUISTIC_PATTERNS|PERSONAL_INFO|PREFERENCES|FACTUAL_INFORMATION|PERSONAL_INFORMATION)\]")
});
static FACT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(?m)^\s*-\s+\w+:\s+.+?\(confidence:\s+\d+%\)\s*$")
        .build()
        .expect("fact line pattern")
});
static CURRENT_MESSAGE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| ci(r"\[Current message from [^\]]+\]:\s*"));
static SHARED_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new(r"(?m)^\s*\[\w+ - Agent \d+\].*?$")
        .build()
        .expect("shared entry pattern")
});

/// Lighter models sometimes echo the injected memory context back. Strip
/// every marker the context formatter emits before the reply leaves the
/// system.
pub fn strip_internal_context(text: &str) -> String {
    let original_len = text.len();
    let mut cleaned = PAST_MARKER.replace_all(text, "").to_string();
    cleaned = SECTION_HEADERS.replace_all(&cleaned, "").to_string();
    cleaned = FACT_CATEGORY.replace_all(&cleaned, "").to_string();
    cleaned = FACT_LINE.replace_all(&cleaned, "").to_string();
    cleaned = CURRENT_MESSAGE_PREFIX.replace_all(&cleaned, "").to_string();
    cleaned = SHARED_ENTRY.replace_all(&cleaned, "").to_string();
    cleaned = EXCESS_NEWLINES.replace_all(&cleaned, "\n\n").to_string();
    let cleaned = cleaned.trim().to_string();
    if cleaned.len() != original_len {
        warn!("stripped internal context markers from response");
    }
    cleaned
}

/// Patterns whose presence means the reply is leaking system internals and
/// must be replaced wholesale.
static SENSITIVE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\btool:\s*\w+",
        r"\bcommand:\s*\w+",
        r"\bsystem_prompt",
        r"\benabled_tools",
        r"\bskill_type:\s*",
        r"\bdb\.query\(",
        r"\bbackend/",
        r"\bmodel_provider",
        r"\bagent_id:\s*\d+",
        r"\bcontext_data:",
        r"\[PAST - \d+%\]",
        r"=== What I Know About",
        r"=== Shared Knowledge",
        r"confidence: \d+%",
    ]
    .iter()
    .map(|p| ci(p))
    .collect()
});

/// Fallback reply used when a response had to be suppressed.
pub const SAFE_APOLOGY: &str =
    "Desculpe, não posso fornecer essa informação no momento. Como posso ajudá-lo de outra forma?";

/// Returns the reply unchanged, or the generic apology when a sensitive
/// pattern is present. Safety net behind the two strippers.
pub fn filter_sensitive_content(text: &str) -> String {
    for pattern in SENSITIVE_PATTERNS.iter() {
        if pattern.is_match(text) {
            warn!(pattern = %pattern.as_str(), "blocked response containing sensitive pattern");
            return SAFE_APOLOGY.to_string();
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_think_blocks() {
        let raw = "<think>the user wants a recipe, I should be brief</think>Here is the recipe.";
        assert_eq!(strip_reasoning_tags(raw), "Here is the recipe.");
    }

    #[test]
    fn strips_bracket_and_orphan_tags() {
        let raw = "[REASONING]secret plan[/REASONING]Done.</think>";
        assert_eq!(strip_reasoning_tags(raw), "Done.");
    }

    #[test]
    fn leaked_tool_blocks_are_removed_separately() {
        let raw = "Running it now. ```tool:nmap\ncommand:quick_scan\n``` back soon";
        // Reasoning strip preserves tool blocks for the parser.
        assert!(strip_reasoning_tags(raw).contains("tool:nmap"));
        assert!(!strip_leaked_tool_blocks(raw).contains("tool:nmap"));
    }

    #[test]
    fn strips_memory_echo() {
        let raw = "=== What I Know About This User ===\n[PREFERENCES]\n- favorite_color: blue (confidence: 95%)\nOlá! Como vai?";
        let cleaned = strip_internal_context(raw);
        assert!(!cleaned.contains("What I Know"));
        assert!(!cleaned.contains("favorite_color"));
        assert!(cleaned.contains("Olá! Como vai?"));
    }

    #[test]
    fn strips_current_message_prefix() {
        let raw = "[Current message from Alice]: oi, tudo bem?";
        assert_eq!(strip_internal_context(raw), "oi, tudo bem?");
    }

    #[test]
    fn sensitive_reply_is_replaced_wholesale() {
        let leaked = "Sure! Internally I ran db.query(Agent) with agent_id: 3.";
        assert_eq!(filter_sensitive_content(leaked), SAFE_APOLOGY);
    }

    #[test]
    fn clean_reply_passes_filter() {
        let ok = "Seu pedido chega amanhã às 14h.";
        assert_eq!(filter_sensitive_content(ok), ok);
    }
}
