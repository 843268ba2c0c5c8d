use async_trait::async_trait;

use crate::message::OutboundMessage;

/// Narrow channel-send capability.
///
/// The router owns the real channel-aware sender; the skill/tool subsystem
/// and long-running tool callbacks receive this trait object instead of the
/// router itself, which breaks the router ↔ agent-service ↔ skill-manager
/// ownership cycle.
#[async_trait]
pub trait ChannelSend: Send + Sync {
    /// Deliver one outbound message. Returns `false` on failure; senders log
    /// the cause and never panic. Failed sends are not retried.
    async fn send(&self, msg: &OutboundMessage) -> bool;
}
