use serde::{Deserialize, Serialize};

use crate::types::Channel;

/// Media attachment classification on an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Image,
    Video,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
        }
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" | "voice" | "ptt" => Ok(MediaKind::Audio),
            "image" | "photo" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            "document" | "file" => Ok(MediaKind::Document),
            other => Err(format!("unknown media kind: {}", other)),
        }
    }
}

/// Normalized inbound message, synthesized by every watcher regardless of the
/// transport's native shape.
///
/// Invariant: `(tenant, id)` is globally unique; re-observing the same id is
/// a no-op downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// External message id assigned by the transport.
    pub id: String,
    /// Raw sender identifier (phone, JID, Telegram user id).
    pub sender: String,
    pub sender_name: Option<String>,
    pub body: String,
    pub chat_id: String,
    pub chat_name: Option<String>,
    pub is_group: bool,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub media_type: Option<MediaKind>,
    pub media_url: Option<String>,
    pub media_path: Option<String>,
    pub channel: Channel,
    /// Telegram numeric user id, when the message arrived via Telegram.
    pub telegram_id: Option<String>,
}

impl InboundMessage {
    /// The router's normalized origin key: chat id for groups (so every
    /// participant shares one conversation), sender id for DMs.
    pub fn sender_key(&self) -> &str {
        if self.is_group {
            &self.chat_id
        } else {
            &self.sender
        }
    }
}

/// Outbound payload handed to the channel-aware sender.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub recipient: String,
    pub text: String,
    pub media_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(is_group: bool) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            sender: "5511999990000".into(),
            sender_name: None,
            body: "hi".into(),
            chat_id: "5511888880000-123@g.us".into(),
            chat_name: None,
            is_group,
            timestamp: 1_700_000_000,
            media_type: None,
            media_url: None,
            media_path: None,
            channel: Channel::Whatsapp,
            telegram_id: None,
        }
    }

    #[test]
    fn sender_key_uses_chat_id_for_groups() {
        assert_eq!(msg(true).sender_key(), "5511888880000-123@g.us");
    }

    #[test]
    fn sender_key_uses_sender_for_dms() {
        assert_eq!(msg(false).sender_key(), "5511999990000");
    }

    #[test]
    fn media_kind_accepts_transport_aliases() {
        use std::str::FromStr;
        assert_eq!(MediaKind::from_str("ptt").unwrap(), MediaKind::Audio);
        assert_eq!(MediaKind::from_str("photo").unwrap(), MediaKind::Image);
    }
}
