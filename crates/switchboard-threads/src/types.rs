use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal and non-terminal thread states. Invariant:
/// `completed_at.is_some() ↔ status != Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Active,
    Completed,
    GoalAchieved,
    Timeout,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Completed => "completed",
            ThreadStatus::GoalAchieved => "goal_achieved",
            ThreadStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != ThreadStatus::Active
    }
}

impl std::str::FromStr for ThreadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ThreadStatus::Active),
            "completed" => Ok(ThreadStatus::Completed),
            "goal_achieved" => Ok(ThreadStatus::GoalAchieved),
            "timeout" => Ok(ThreadStatus::Timeout),
            other => Err(format!("unknown thread status: {}", other)),
        }
    }
}

/// One entry of a thread's conversation history. `role` is "user" for the
/// external counterpart and "agent" for our side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadTurn {
    pub role: String,
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ThreadTurn {
    pub fn now(role: &str, content: &str, message_id: Option<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            message_id,
        }
    }
}

/// Mutable scratch space carried across turns (menu memory, reset counter).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadContext {
    #[serde(default)]
    pub session_reset_attempts: u32,
    #[serde(default)]
    pub last_menu_signature: Option<String>,
    #[serde(default)]
    pub last_menu_selection: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConversationThread {
    pub id: i64,
    pub tenant_id: String,
    pub agent_id: i64,
    /// Normalized identifier of the external counterpart.
    pub recipient: String,
    pub objective: String,
    pub current_turn: u32,
    pub max_turns: u32,
    pub status: ThreadStatus,
    pub history: Vec<ThreadTurn>,
    pub goal_achieved: bool,
    pub goal_summary: Option<String>,
    pub persona: Option<String>,
    pub context: ThreadContext,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ConversationThread {
    /// Turns added to the history within the trailing window, for the rate
    /// gate.
    pub fn turns_in_last_minute(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::seconds(60);
        self.history
            .iter()
            .filter(|t| {
                DateTime::parse_from_rfc3339(&t.timestamp)
                    .map(|ts| ts.with_timezone(&Utc) > cutoff)
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn contains_message_id(&self, message_id: &str) -> bool {
        self.history
            .iter()
            .any(|t| t.message_id.as_deref() == Some(message_id))
    }
}
