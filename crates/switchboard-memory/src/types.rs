use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata carried by every working-memory entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub is_group: bool,
    /// Marks a summarized tool execution; the full output lives in the
    /// tool-output ring under `execution_id`.
    #[serde(default)]
    pub is_tool_output: bool,
    #[serde(default)]
    pub tool_used: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<i64>,
}

/// One entry in the working ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub metadata: EntryMetadata,
    pub created_at: String,
}

/// Episodic recall hit, already converted from distance to similarity.
#[derive(Debug, Clone)]
pub struct EpisodicHit {
    pub content: String,
    pub similarity: f32,
    pub sender_name: Option<String>,
}

/// Fixed topic vocabulary for extracted facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactTopic {
    Preferences,
    PersonalInfo,
    History,
    Relationships,
    Goals,
    Instructions,
    CommunicationStyle,
    InsideJokes,
    LinguisticPatterns,
}

impl FactTopic {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactTopic::Preferences => "preferences",
            FactTopic::PersonalInfo => "personal_info",
            FactTopic::History => "history",
            FactTopic::Relationships => "relationships",
            FactTopic::Goals => "goals",
            FactTopic::Instructions => "instructions",
            FactTopic::CommunicationStyle => "communication_style",
            FactTopic::InsideJokes => "inside_jokes",
            FactTopic::LinguisticPatterns => "linguistic_patterns",
        }
    }

    pub const ALL: [FactTopic; 9] = [
        FactTopic::Preferences,
        FactTopic::PersonalInfo,
        FactTopic::History,
        FactTopic::Relationships,
        FactTopic::Goals,
        FactTopic::Instructions,
        FactTopic::CommunicationStyle,
        FactTopic::InsideJokes,
        FactTopic::LinguisticPatterns,
    ];
}

impl fmt::Display for FactTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FactTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FactTopic::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown fact topic: {}", s))
    }
}

/// A learned fact about one user, scoped to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub topic: FactTopic,
    pub key: String,
    pub value: String,
    /// Always within `[0, 1]` after any update.
    pub confidence: f64,
    pub learned_at: String,
    pub updated_at: String,
}

/// Visibility of a shared-knowledge item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Restricted,
    Private,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Restricted => "restricted",
            AccessLevel::Private => "private",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(AccessLevel::Public),
            "restricted" => Ok(AccessLevel::Restricted),
            "private" => Ok(AccessLevel::Private),
            other => Err(format!("unknown access level: {}", other)),
        }
    }
}

/// One item in the tenant's shared-knowledge pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedKnowledge {
    pub id: i64,
    pub tenant_id: String,
    pub shared_by_agent: i64,
    pub content: String,
    pub topic: String,
    pub access_level: AccessLevel,
    /// Agent ids allowed to read when `access_level` is restricted.
    pub accessible_to: Vec<i64>,
    pub created_at: String,
}

/// Assembled context returned by `get_context`.
#[derive(Debug, Clone, Default)]
pub struct MemoryContext {
    pub working: Vec<MemoryEntry>,
    pub episodic: Vec<EpisodicHit>,
    /// Facts grouped by topic string, ordered for stable rendering.
    pub facts: BTreeMap<String, Vec<Fact>>,
    pub shared: Vec<SharedKnowledge>,
}

impl MemoryContext {
    pub fn is_empty(&self) -> bool {
        self.working.is_empty()
            && self.episodic.is_empty()
            && self.facts.is_empty()
            && self.shared.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn topic_round_trips() {
        for t in FactTopic::ALL {
            assert_eq!(FactTopic::from_str(t.as_str()).unwrap(), t);
        }
    }

    #[test]
    fn metadata_defaults_are_benign() {
        let m: EntryMetadata = serde_json::from_str("{}").unwrap();
        assert!(!m.is_tool_output);
        assert!(m.execution_id.is_none());
    }
}
