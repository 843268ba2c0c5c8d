//! Built-in skills.

pub mod adaptive_personality;
pub mod flight_search;
pub mod knowledge_sharing;
pub mod shell;
pub mod transcription;
pub mod web_search;
