//! Shared types and configuration for the Switchboard workspace.
//!
//! Everything here is channel- and storage-agnostic: identifiers, the
//! normalized message shapes that cross crate boundaries, the narrow
//! channel-send capability, and the figment-backed configuration.

pub mod config;
pub mod message;
pub mod send;
pub mod types;
