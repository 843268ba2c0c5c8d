use serde::{Deserialize, Serialize};
use std::fmt;

use switchboard_core::types::ContactId;

/// What kind of identity a channel mapping carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelIdentifierKind {
    Phone,
    WhatsappId,
    TelegramId,
    TelegramUsername,
}

impl ChannelIdentifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelIdentifierKind::Phone => "phone",
            ChannelIdentifierKind::WhatsappId => "whatsapp_id",
            ChannelIdentifierKind::TelegramId => "telegram_id",
            ChannelIdentifierKind::TelegramUsername => "telegram_username",
        }
    }
}

impl fmt::Display for ChannelIdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelIdentifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(ChannelIdentifierKind::Phone),
            "whatsapp_id" => Ok(ChannelIdentifierKind::WhatsappId),
            "telegram_id" => Ok(ChannelIdentifierKind::TelegramId),
            "telegram_username" => Ok(ChannelIdentifierKind::TelegramUsername),
            other => Err(format!("unknown channel identifier kind: {}", other)),
        }
    }
}

/// Role a contact plays inside a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactRole {
    #[default]
    User,
    Agent,
    System,
}

impl ContactRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactRole::User => "user",
            ContactRole::Agent => "agent",
            ContactRole::System => "system",
        }
    }
}

impl std::str::FromStr for ContactRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ContactRole::User),
            "agent" => Ok(ContactRole::Agent),
            "system" => Ok(ContactRole::System),
            other => Err(format!("unknown contact role: {}", other)),
        }
    }
}

/// Canonical identity behind one or more channel identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: String,
    pub friendly_name: String,
    pub role: ContactRole,
    pub is_active: bool,
    /// Legacy columns kept for resolution fallback; new identities live in
    /// the channel-mapping table.
    pub phone_number: Option<String>,
    pub whatsapp_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One (channel kind, identifier) → contact link.
#[derive(Debug, Clone)]
pub struct ChannelMapping {
    pub contact_id: ContactId,
    pub tenant_id: String,
    pub kind: ChannelIdentifierKind,
    pub identifier: String,
}
