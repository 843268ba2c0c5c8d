//! Render a [`MemoryContext`] into the text prefix injected ahead of the
//! user message.

use crate::types::MemoryContext;

/// Options that shape the rendered prefix.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Hard cap on total rendered characters.
    pub max_chars: usize,
    /// Include entries tagged `is_tool_output`. Off unless the router's
    /// freshness heuristic asked for them.
    pub include_tool_outputs: bool,
    /// The adaptive-personality skill injects its own style block, so the
    /// fact section skips the style topics and the header block is omitted.
    pub adaptive_personality: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            max_chars: 50_000,
            include_tool_outputs: false,
            adaptive_personality: false,
        }
    }
}

const STYLE_TOPICS: &[&str] = &["communication_style", "inside_jokes", "linguistic_patterns"];

/// Assemble the context prefix. Working memory is capped to the last 20
/// entries; the whole prefix is truncated at `max_chars`.
pub fn format_context_for_prompt(context: &MemoryContext, opts: &FormatOptions) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut chars = 0usize;
    let mut push = |lines: &mut Vec<String>, chars: &mut usize, line: String| -> bool {
        if *chars + line.len() > opts.max_chars {
            lines.push("... [context truncated]".to_string());
            return false;
        }
        *chars += line.len();
        lines.push(line);
        true
    };

    if !context.working.is_empty() {
        push(&mut lines, &mut chars, "=== Recent Conversation ===".into());
        let start = context.working.len().saturating_sub(20);
        'working: for entry in &context.working[start..] {
            if !opts.include_tool_outputs && entry.metadata.is_tool_output {
                continue;
            }
            let role = entry.role.to_uppercase();
            let line = match &entry.metadata.sender_name {
                Some(name) => format!("[{} - {}] {}", role, name, entry.content),
                None => format!("[{}] {}", role, entry.content),
            };
            if !push(&mut lines, &mut chars, line) {
                break 'working;
            }
        }
    }

    if !context.episodic.is_empty() {
        push(&mut lines, &mut chars, "\n=== Relevant Past Messages ===".into());
        for hit in &context.episodic {
            let pct = (hit.similarity * 100.0).round() as u32;
            let line = match &hit.sender_name {
                Some(name) => format!("[PAST - {}% - {}] {}", pct, name, hit.content),
                None => format!("[PAST - {}%] {}", pct, hit.content),
            };
            if !push(&mut lines, &mut chars, line) {
                break;
            }
        }
    }

    if !context.facts.is_empty() && !opts.adaptive_personality {
        push(
            &mut lines,
            &mut chars,
            "\n=== What I Know About This User ===".into(),
        );
        for (topic, facts) in &context.facts {
            if STYLE_TOPICS.contains(&topic.as_str()) {
                continue;
            }
            push(&mut lines, &mut chars, format!("[{}]", topic.to_uppercase()));
            for fact in facts {
                let line = format!(
                    "  - {}: {} (confidence: {}%)",
                    fact.key,
                    fact.value,
                    (fact.confidence * 100.0).round() as u32
                );
                if !push(&mut lines, &mut chars, line) {
                    break;
                }
            }
        }
    }

    if !context.shared.is_empty() {
        push(
            &mut lines,
            &mut chars,
            "\n=== Shared Knowledge (From Other Agents) ===".into(),
        );
        for item in &context.shared {
            let line = format!(
                "  [{} - Agent {}] {}",
                item.topic.to_uppercase(),
                item.shared_by_agent,
                item.content
            );
            if !push(&mut lines, &mut chars, line) {
                break;
            }
        }
    }

    if lines.is_empty() {
        "[No previous context]".to_string()
    } else {
        lines.join("\n")
    }
}
