//! Long-poll watcher for a Telegram bot instance (Bot API `getUpdates`).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use switchboard_core::message::InboundMessage;
use switchboard_core::types::Channel;
use switchboard_router::Router;

use crate::filter::MessageFilter;

/// Long-poll hold time requested from the Bot API.
const LONG_POLL_SECS: u64 = 30;

pub struct TelegramWatcher {
    instance_id: i64,
    bot_token: String,
    router: Arc<Router>,
    filter: MessageFilter,
    client: reqwest::Client,
    token: CancellationToken,
}

impl TelegramWatcher {
    pub fn new(
        instance_id: i64,
        bot_token: String,
        router: Arc<Router>,
        filter: MessageFilter,
        token: CancellationToken,
    ) -> Self {
        Self {
            instance_id,
            bot_token,
            router,
            filter,
            client: reqwest::Client::new(),
            token,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut offset: i64 = 0;
        info!(instance = self.instance_id, "Telegram watcher started");

        loop {
            if self.token.is_cancelled() {
                info!(instance = self.instance_id, "Telegram watcher stopping");
                return;
            }

            let poll = self.poll(offset);
            let updates = tokio::select! {
                _ = self.token.cancelled() => {
                    info!(instance = self.instance_id, "Telegram watcher stopping");
                    return;
                }
                result = poll => result,
            };

            match updates {
                Ok(updates) => {
                    for (update_id, msg) in updates {
                        offset = offset.max(update_id + 1);
                        let Some(msg) = msg else { continue };
                        if !self.filter.matches(&msg) {
                            continue;
                        }
                        let router = Arc::clone(&self.router);
                        tokio::spawn(async move {
                            router.route_message(msg, "telegram_message").await;
                        });
                    }
                }
                Err(e) => {
                    warn!(instance = self.instance_id, error = %e, "getUpdates failed");
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn poll(
        &self,
        offset: i64,
    ) -> Result<Vec<(i64, Option<InboundMessage>)>, reqwest::Error> {
        let url = format!("https://api.telegram.org/bot{}/getUpdates", self.bot_token);
        let payload: serde_json::Value = self
            .client
            .get(url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", LONG_POLL_SECS.to_string()),
            ])
            .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
            .send()
            .await?
            .json()
            .await?;

        Ok(payload["result"]
            .as_array()
            .map(|updates| {
                updates
                    .iter()
                    .filter_map(|u| {
                        let update_id = u["update_id"].as_i64()?;
                        Some((update_id, parse_update(u)))
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Normalize one Bot API update. Non-message updates yield `None` but the
/// caller still advances the offset past them.
fn parse_update(update: &serde_json::Value) -> Option<InboundMessage> {
    let message = &update["message"];
    let from = &message["from"];
    if from["is_bot"].as_bool().unwrap_or(false) {
        return None;
    }
    let message_id = message["message_id"].as_i64()?;
    let chat_id = message["chat"]["id"].as_i64()?;
    let user_id = from["id"].as_i64()?;
    let chat_type = message["chat"]["type"].as_str().unwrap_or("private");

    let body = message["text"]
        .as_str()
        .or_else(|| message["caption"].as_str())
        .unwrap_or_default()
        .to_string();
    let has_voice = message["voice"].is_object() || message["audio"].is_object();

    Some(InboundMessage {
        id: format!("tg-{}-{}", chat_id, message_id),
        sender: user_id.to_string(),
        sender_name: from["first_name"].as_str().map(String::from),
        body,
        chat_id: chat_id.to_string(),
        chat_name: message["chat"]["title"].as_str().map(String::from),
        is_group: chat_type != "private",
        timestamp: message["date"].as_i64().unwrap_or(0),
        media_type: has_voice.then_some(switchboard_core::message::MediaKind::Audio),
        media_url: None,
        media_path: None,
        channel: Channel::Telegram,
        telegram_id: Some(user_id.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_private_message() {
        let update = serde_json::json!({
            "update_id": 42,
            "message": {
                "message_id": 7,
                "date": 1_700_000_000,
                "text": "hello bot",
                "from": {"id": 12345678, "is_bot": false, "first_name": "Alice"},
                "chat": {"id": 12345678, "type": "private"}
            }
        });
        let msg = parse_update(&update).unwrap();
        assert_eq!(msg.id, "tg-12345678-7");
        assert!(!msg.is_group);
        assert_eq!(msg.telegram_id.as_deref(), Some("12345678"));
        assert_eq!(msg.channel, Channel::Telegram);
    }

    #[test]
    fn group_chat_is_flagged() {
        let update = serde_json::json!({
            "update_id": 43,
            "message": {
                "message_id": 8,
                "date": 1,
                "text": "oi",
                "from": {"id": 1, "is_bot": false},
                "chat": {"id": -100123, "type": "supergroup", "title": "Equipe"}
            }
        });
        let msg = parse_update(&update).unwrap();
        assert!(msg.is_group);
        assert_eq!(msg.chat_id, "-100123");
    }

    #[test]
    fn bot_messages_are_ignored() {
        let update = serde_json::json!({
            "update_id": 44,
            "message": {
                "message_id": 9,
                "date": 1,
                "text": "beep",
                "from": {"id": 2, "is_bot": true},
                "chat": {"id": 2, "type": "private"}
            }
        });
        assert!(parse_update(&update).is_none());
    }
}
