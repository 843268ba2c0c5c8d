//! LLM-backed fact extraction from the recent conversation buffer.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::types::{Fact, FactTopic, MemoryEntry};

/// Narrow capability the extractor needs from the LLM layer. The router
/// wires a provider-backed implementation; tests use a canned one. Keeping
/// the trait here avoids a dependency cycle with the provider registry.
#[async_trait]
pub trait ExtractionModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Pinned extraction prompt. The response contract is "JSON array only";
/// everything else is handled by the lenient parser below.
pub const EXTRACTION_PROMPT: &str = r#"You are a fact extraction assistant. Analyze the conversation and extract structured facts about the user.

IMPORTANT: Your response MUST be ONLY a valid JSON array. Do not include any explanatory text before or after the JSON.

Extract facts in the following categories:
- preferences: likes, dislikes, favorites, hobbies
- personal_info: name, job, location, age, family
- history: past events, experiences, stories
- relationships: friends, family, colleagues mentioned
- goals: future plans, aspirations, intentions
- instructions: explicit memorization requests, keywords, responses to remember
- communication_style: slang, frequently used words, tone preferences, formality level
- inside_jokes: recurring jokes, references, memes used by the sender
- linguistic_patterns: emoji usage, greeting style, farewell style, signature phrases

When the user explicitly instructs ("memorize that X is Y", "quando eu perguntar X, responda Y", "when I ask X, respond Y"), extract an "instructions" fact with confidence 0.95 or higher.

For each fact provide: topic, key (short identifier), value, confidence (0.0-1.0), context (brief quote).

Only extract facts that are clearly stated or strongly implied, about the USER or explicit instructions from the user, and persistent (not temporary states like "I'm hungry").

If no facts are found, return [].

Conversation to analyze:
"#;

/// Explicit PT/EN instruction phrases that force extraction regardless of
/// the message-count threshold.
const INSTRUCTION_PATTERNS: &[&str] = &[
    "quando eu perguntar",
    "quando perguntar",
    "memorize",
    "lembre",
    "palavra chave",
    "password",
    "codigo",
    "when i ask",
    "remember that",
    "memorize this",
    "keyword",
    "secret word",
];

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedFact {
    pub topic: String,
    pub key: String,
    pub value: String,
    pub confidence: f64,
    #[serde(default)]
    pub context: Option<String>,
}

pub struct FactExtractor<M: ExtractionModel> {
    model: M,
}

impl<M: ExtractionModel> FactExtractor<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    /// Run the extraction prompt over the buffer and return validated facts.
    /// Malformed model output degrades to an empty list, never an error.
    pub async fn extract(&self, conversation: &[MemoryEntry]) -> Result<Vec<Fact>> {
        extract_with(&self.model, conversation).await
    }
}

/// Trait-object form of [`FactExtractor::extract`], used where the model is
/// injected dynamically.
pub async fn extract_with(
    model: &dyn ExtractionModel,
    conversation: &[MemoryEntry],
) -> Result<Vec<Fact>> {
    if conversation.is_empty() {
        return Ok(Vec::new());
    }

    let formatted = format_conversation(conversation);
    let raw = model
        .complete(EXTRACTION_PROMPT, &formatted)
        .await
        .map_err(|e| MemoryError::ExtractionModel(e.to_string()))?;

    let facts = parse_extraction_response(&raw);
    info!(count = facts.len(), "fact extraction complete");
    Ok(facts)
}

/// Decide whether the buffer is worth an extraction call.
///
/// Fires when an explicit instruction phrase appears anywhere in the buffer,
/// or once `min_user_messages` user turns have accumulated (lowered to 2 when
/// the adaptive-personality skill is enabled) and the buffer has substance.
pub fn should_extract(
    conversation: &[MemoryEntry],
    min_user_messages: usize,
    adaptive_personality: bool,
) -> bool {
    if conversation.is_empty() {
        return false;
    }

    for entry in conversation {
        let content = entry.content.to_lowercase();
        if INSTRUCTION_PATTERNS.iter().any(|p| content.contains(p)) {
            debug!("instruction pattern detected; forcing fact extraction");
            return true;
        }
    }

    let (mut min_messages, mut min_length) = (min_user_messages, 50usize);
    if adaptive_personality {
        min_messages = min_messages.min(2);
        min_length = min_length.min(30);
    }

    let user_messages = conversation.iter().filter(|m| m.role == "user").count();
    if user_messages < min_messages {
        return false;
    }

    let total_length: usize = conversation.iter().map(|m| m.content.len()).sum();
    total_length >= min_length
}

fn format_conversation(conversation: &[MemoryEntry]) -> String {
    let mut out = String::new();
    for entry in conversation {
        let role = if entry.role == "assistant" {
            "Assistant"
        } else {
            "User"
        };
        out.push_str(&format!("{}: {}\n", role, entry.content));
    }
    out
}

/// Lenient JSON parsing: fenced-block strip → bracket slice → per-item
/// validation. Falls through to an empty list on hopeless input.
pub fn parse_extraction_response(raw: &str) -> Vec<Fact> {
    let mut text = raw.trim().to_string();

    if let Some(start) = text.find("```json") {
        let body = &text[start + 7..];
        if let Some(end) = body.find("```") {
            text = body[..end].trim().to_string();
        }
    } else if let Some(start) = text.find("```") {
        let body = &text[start + 3..];
        if let Some(end) = body.find("```") {
            text = body[..end].trim().to_string();
        }
    }

    if !text.starts_with('[') {
        if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
            if end > start {
                text = text[start..=end].to_string();
            }
        }
    }

    let parsed: Vec<ExtractedFact> = match serde_json::from_str::<Vec<ExtractedFact>>(&text) {
        Ok(f) => f,
        Err(first_err) => {
            // Last resort: collapse newlines, which fixes the most common
            // LLM formatting damage inside string values.
            let squashed = text.replace(['\n', '\r'], " ");
            match serde_json::from_str(&squashed) {
                Ok(f) => f,
                Err(_) => {
                    warn!(error = %first_err, "fact extraction returned unparseable JSON");
                    return Vec::new();
                }
            }
        }
    };

    let now = chrono::Utc::now().to_rfc3339();
    parsed
        .into_iter()
        .filter_map(|f| {
            if f.key.is_empty() || f.value.is_empty() {
                return None;
            }
            if !(0.0..=1.0).contains(&f.confidence) {
                return None;
            }
            // Unknown topics are folded into personal_info rather than dropped.
            let topic = f.topic.parse().unwrap_or(FactTopic::PersonalInfo);
            Some(Fact {
                topic,
                key: f.key,
                value: f.value,
                confidence: f.confidence,
                learned_at: now.clone(),
                updated_at: now.clone(),
            })
        })
        .collect()
}
