//! Pluggable provider registries (LLM, TTS, web search, flight search).
//!
//! All providers share one contract: `execute(request)` returns a
//! [`types::ProviderResponse`] that carries `success`, the payload, the
//! provider name, a discriminated error kind, and a usage blob. Providers
//! never panic and never surface transport errors as `Err` — a failed call
//! is a response with `success = false`.
//!
//! A provider instance is built per call with the calling tenant's
//! decrypted credentials; instances are never shared across tenants.

pub mod credentials;
pub mod error;
pub mod flights;
pub mod http;
pub mod llm;
pub mod registry;
pub mod search;
pub mod tts;
pub mod types;
pub mod usage;

pub use error::{ProviderError, Result};
pub use registry::{
    builtin_flight_registry, builtin_llm_registry, builtin_search_registry, builtin_tts_registry,
    FlightRegistry, LlmRegistry, ProviderRegistry, SearchRegistry, TtsRegistry,
};
