//! Transport watchers and the channel-aware sender.
//!
//! One long-running watcher per live transport instance: WhatsApp instances
//! poll their MCP container's HTTP API, Telegram instances long-poll the
//! Bot API. Both synthesize the normalized `InboundMessage` and hand it to
//! the router after the message filter.

pub mod error;
pub mod filter;
pub mod instances;
pub mod manager;
pub mod sender;
pub mod telegram;
pub mod watcher;

pub use error::{Result, TransportError};
pub use manager::WatcherManager;
pub use sender::ChannelSender;
