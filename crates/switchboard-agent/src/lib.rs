//! Agent service (C11): prompt assembly, LLM invocation, response
//! post-processing, tool-call parsing and dispatch, and the safety filters
//! that sit between the model and the user.

pub mod contamination;
pub mod error;
pub mod profile;
pub mod prompt;
pub mod sanitize;
pub mod sentinel;
pub mod service;
pub mod toolcall;

pub use error::{AgentError, Result};
pub use profile::AgentProfile;
pub use service::{AgentReply, AgentService};
