//! Conversation-thread engine (outbound-initiated, objective-driven
//! dialogues with an external counterpart — typically another bot).
//!
//! A thread is a bounded state machine: `active` until a goal signal, a
//! safety gate, the stagnation detector, or an inactivity timeout closes
//! it. Closed threads impose a cooldown on the sender so a chatty external
//! bot cannot immediately re-open the loop.

pub mod ack;
pub mod db;
pub mod engine;
pub mod error;
pub mod goal;
pub mod lookup;
pub mod menu;
pub mod reset;
pub mod stagnation;
pub mod types;

pub use engine::{ThreadEngine, ThreadReply};
pub use error::{Result, ThreadError};
pub use types::{ConversationThread, ThreadStatus};
