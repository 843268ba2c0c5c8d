use serde::{Deserialize, Serialize};
use std::fmt;

/// Tenant identifier. Every persisted row is owned by exactly one tenant and
/// every query must be scoped by one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Single-tenant installs use "default".
    pub fn default_tenant() -> Self {
        Self("default".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Database row id of an agent.
pub type AgentId = i64;

/// Database row id of a contact.
pub type ContactId = i64;

/// Transport family. A transport *instance* is one live connection within a
/// channel (one WhatsApp MCP container, one Telegram bot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Telegram,
    Playground,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Telegram => "telegram",
            Channel::Playground => "playground",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(Channel::Whatsapp),
            "telegram" => Ok(Channel::Telegram),
            "playground" => Ok(Channel::Playground),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// How an agent partitions its memory across senders and chats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Per-sender memory across all channels (strictest privacy).
    #[default]
    Isolated,
    /// One global memory everyone shares.
    Shared,
    /// Per-chat memory (groups separated from DMs).
    ChannelIsolated,
}

impl IsolationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationMode::Isolated => "isolated",
            IsolationMode::Shared => "shared",
            IsolationMode::ChannelIsolated => "channel_isolated",
        }
    }
}

impl std::str::FromStr for IsolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolated" => Ok(IsolationMode::Isolated),
            "shared" => Ok(IsolationMode::Shared),
            "channel_isolated" => Ok(IsolationMode::ChannelIsolated),
            other => Err(format!("unknown isolation mode: {}", other)),
        }
    }
}
