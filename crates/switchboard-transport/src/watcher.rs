//! Polling watcher for a WhatsApp MCP instance.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_core::config::WatcherConfig;
use switchboard_core::message::{InboundMessage, MediaKind};
use switchboard_core::types::Channel;
use switchboard_router::Router;

use crate::filter::MessageFilter;
use crate::instances::TransportInstance;

pub struct McpWatcher {
    instance: TransportInstance,
    router: Arc<Router>,
    filter: MessageFilter,
    config: WatcherConfig,
    client: reqwest::Client,
    token: CancellationToken,
    /// Per-chat debounce bookkeeping.
    last_dispatch: DashMap<String, std::time::Instant>,
}

impl McpWatcher {
    pub fn new(
        instance: TransportInstance,
        router: Arc<Router>,
        filter: MessageFilter,
        config: WatcherConfig,
        token: CancellationToken,
    ) -> Self {
        Self {
            instance,
            router,
            filter,
            config,
            client: reqwest::Client::new(),
            token,
            last_dispatch: DashMap::new(),
        }
    }

    /// Poll loop. Exits cooperatively when the token is cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut last_seen = self.initial_watermark();
        info!(
            instance = self.instance.id,
            api_url = %self.instance.api_url,
            last_seen,
            "MCP watcher started"
        );

        loop {
            if self.token.is_cancelled() {
                info!(instance = self.instance.id, "MCP watcher stopping");
                return;
            }

            match self.poll(last_seen).await {
                Ok(messages) => {
                    for msg in messages {
                        last_seen = last_seen.max(msg.timestamp);
                        if !self.filter.matches(&msg) {
                            continue;
                        }
                        self.dispatch(msg).await;
                    }
                }
                Err(e) => {
                    warn!(instance = self.instance.id, error = %e, "poll failed");
                }
            }

            tokio::select! {
                _ = self.token.cancelled() => {
                    info!(instance = self.instance.id, "MCP watcher stopping");
                    return;
                }
                _ = sleep(Duration::from_millis(self.config.poll_interval_ms)) => {}
            }
        }
    }

    /// New instances start from their creation time so transport-side
    /// history sync is never replayed; established instances start from now.
    fn initial_watermark(&self) -> i64 {
        let now = chrono::Utc::now().timestamp();
        let created = chrono::DateTime::parse_from_rfc3339(&self.instance.created_at)
            .map(|t| t.timestamp())
            .unwrap_or(now);
        if now - created < self.config.new_instance_grace_secs {
            created
        } else {
            now
        }
    }

    /// `GET {api_url}/api/messages?since={ts}` — strictly newer messages.
    async fn poll(&self, since: i64) -> Result<Vec<InboundMessage>, reqwest::Error> {
        let mut request = self
            .client
            .get(format!(
                "{}/api/messages",
                self.instance.api_url.trim_end_matches('/')
            ))
            .query(&[("since", since.to_string())])
            .timeout(Duration::from_secs(15));
        if let Some(secret) = &self.instance.api_secret {
            request = request.bearer_auth(secret);
        }

        let payload: serde_json::Value = request.send().await?.json().await?;
        let items = payload["messages"]
            .as_array()
            .or_else(|| payload.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| parse_mcp_message(item, since))
            .collect())
    }

    async fn dispatch(&self, msg: InboundMessage) {
        // Debounce: hold rapid messages from one chat so they collapse into
        // a single reply turn.
        let delay_ms = self.config.conversation_delay_ms;
        if delay_ms > 0 {
            let recently_dispatched = self
                .last_dispatch
                .get(&msg.chat_id)
                .map(|at| at.elapsed() < Duration::from_millis(delay_ms))
                .unwrap_or(false);
            if recently_dispatched {
                debug!(chat = %msg.chat_id, "debouncing rapid message");
                sleep(Duration::from_millis(delay_ms)).await;
            }
            self.last_dispatch
                .insert(msg.chat_id.clone(), std::time::Instant::now());
        }

        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            router.route_message(msg, "whatsapp_message").await;
        });
    }
}

/// Normalize one MCP API message into the shared inbound shape. Messages
/// at or before the watermark are dropped (strictly-newer contract).
fn parse_mcp_message(item: &serde_json::Value, since: i64) -> Option<InboundMessage> {
    let id = item["id"].as_str()?.to_string();
    let timestamp = item["timestamp"].as_i64().unwrap_or(0);
    if timestamp <= since {
        return None;
    }

    Some(InboundMessage {
        id,
        sender: item["sender"].as_str().unwrap_or_default().to_string(),
        sender_name: item["sender_name"].as_str().map(String::from),
        body: item["body"].as_str().unwrap_or_default().to_string(),
        chat_id: item["chat_id"].as_str().unwrap_or_default().to_string(),
        chat_name: item["chat_name"].as_str().map(String::from),
        is_group: item["is_group"].as_bool().unwrap_or(false),
        timestamp,
        media_type: item["media_type"]
            .as_str()
            .and_then(|m| MediaKind::from_str(m).ok()),
        media_url: item["media_url"].as_str().map(String::from),
        media_path: item["media_path"].as_str().map(String::from),
        channel: Channel::Whatsapp,
        telegram_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mcp_message_shape() {
        let item = serde_json::json!({
            "id": "wamid.1",
            "sender": "5511999990000@s.whatsapp.net",
            "sender_name": "Alice",
            "body": "oi",
            "chat_id": "5511999990000@s.whatsapp.net",
            "is_group": false,
            "timestamp": 1_700_000_100,
            "media_type": "ptt",
            "media_path": "/tmp/x.ogg"
        });
        let msg = parse_mcp_message(&item, 1_700_000_000).unwrap();
        assert_eq!(msg.id, "wamid.1");
        assert_eq!(msg.media_type, Some(MediaKind::Audio));
        assert_eq!(msg.channel, Channel::Whatsapp);
    }

    #[test]
    fn messages_at_or_before_watermark_are_dropped() {
        let item = serde_json::json!({
            "id": "wamid.1",
            "sender": "s",
            "body": "old",
            "chat_id": "c",
            "timestamp": 1_700_000_000
        });
        assert!(parse_mcp_message(&item, 1_700_000_000).is_none());
        assert!(parse_mcp_message(&item, 1_699_999_999).is_some());
    }

    #[test]
    fn malformed_items_are_skipped() {
        assert!(parse_mcp_message(&serde_json::json!({"no_id": true}), 0).is_none());
    }
}
