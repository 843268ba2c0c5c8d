//! Message filter applied before anything reaches the router.

use tracing::debug;

use switchboard_core::message::InboundMessage;

/// Per-instance inbound filter.
///
/// Deny-by-default posture for groups (allowlist when configured, mention
/// requirement when configured); DMs honor the auto-reply flag and the
/// optional number filter. The QA number forces safe mode regardless.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Group chat ids or names this instance may answer in. Empty = all.
    pub group_allowlist: Vec<String>,
    /// Sender numbers this instance may answer. Empty = all.
    pub number_filters: Vec<String>,
    /// Groups require an `@agent` mention when set.
    pub require_mention_in_groups: bool,
    /// Agent names recognized as mentions.
    pub agent_names: Vec<String>,
    /// Whether DMs are auto-answered at all.
    pub dm_auto_mode: bool,
    /// QA/tester number: traffic from it never auto-answers.
    pub qa_phone_number: Option<String>,
}

impl MessageFilter {
    pub fn matches(&self, msg: &InboundMessage) -> bool {
        let normalized_sender = msg.sender.split('@').next().unwrap_or("").trim_start_matches('+');

        if let Some(qa) = &self.qa_phone_number {
            if normalized_sender == qa.trim_start_matches('+') {
                debug!(sender = %msg.sender, "QA number in safe mode; dropping");
                return false;
            }
        }

        if msg.is_group {
            if !self.group_allowlist.is_empty() {
                let allowed = self.group_allowlist.iter().any(|g| {
                    msg.chat_id.contains(g.as_str())
                        || msg
                            .chat_name
                            .as_deref()
                            .map(|n| n.contains(g.as_str()))
                            .unwrap_or(false)
                });
                if !allowed {
                    debug!(chat = %msg.chat_id, "group not in allowlist");
                    return false;
                }
            }
            if self.require_mention_in_groups {
                let body_lower = msg.body.to_lowercase();
                let mentioned = self
                    .agent_names
                    .iter()
                    .any(|name| body_lower.contains(&format!("@{}", name.to_lowercase())));
                if !mentioned {
                    debug!(chat = %msg.chat_id, "group message without required mention");
                    return false;
                }
            }
            return true;
        }

        // DMs.
        if !self.dm_auto_mode {
            debug!(sender = %msg.sender, "DM auto mode off");
            return false;
        }
        if !self.number_filters.is_empty() {
            let allowed = self
                .number_filters
                .iter()
                .any(|n| n.trim_start_matches('+') == normalized_sender);
            if !allowed {
                debug!(sender = %msg.sender, "sender not in number filter");
                return false;
            }
        }
        true
    }
}
