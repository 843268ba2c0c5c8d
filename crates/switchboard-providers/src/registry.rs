//! Name-keyed provider registries with per-call, tenant-scoped instantiation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use switchboard_core::types::TenantId;

use crate::credentials::CredentialStore;
use crate::error::{ProviderError, Result};
use crate::flights::{AmadeusFlights, FlightProvider, GoogleFlights};
use crate::http::shared_client;
use crate::llm::{AnthropicProvider, LlmProvider, OllamaProvider, OpenAiCompatProvider};
use crate::search::{BraveSearch, SearchProvider, SerpApiSearch};
use crate::tts::{ElevenLabsTts, KokoroTts, OpenAiTts, TtsProvider};
use crate::types::{HealthReport, ProviderInfo};

/// Builds a provider instance for one call, with the tenant's decrypted
/// credentials. Returning `NotConfigured` here is how a missing or
/// undecryptable key surfaces.
pub type ProviderFactory<P> =
    Arc<dyn Fn(&CredentialStore, &TenantId) -> Result<Arc<P>> + Send + Sync>;

struct RegistryEntry<P: ?Sized> {
    info: ProviderInfo,
    factory: ProviderFactory<P>,
}

/// One registry per provider family; entries are keyed by provider name.
pub struct ProviderRegistry<P: ?Sized> {
    entries: RwLock<HashMap<String, RegistryEntry<P>>>,
}

impl<P: ?Sized> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, info: ProviderInfo, factory: ProviderFactory<P>) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(info.name.to_string(), RegistryEntry { info, factory });
    }

    /// Instantiate the named provider with the calling tenant's credentials.
    pub fn get(
        &self,
        name: &str,
        credentials: &CredentialStore,
        tenant: &TenantId,
    ) -> Result<Arc<P>> {
        let entries = self.entries.read().unwrap();
        let entry = entries
            .get(name)
            .ok_or_else(|| ProviderError::UnknownProvider(name.to_string()))?;
        (entry.factory)(credentials, tenant)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().unwrap().contains_key(name)
    }

    pub fn list(&self) -> Vec<ProviderInfo> {
        let mut infos: Vec<ProviderInfo> = self
            .entries
            .read()
            .unwrap()
            .values()
            .map(|e| e.info.clone())
            .collect();
        infos.sort_by_key(|i| i.name);
        infos
    }
}

impl<P: ?Sized> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

pub type LlmRegistry = ProviderRegistry<dyn LlmProvider>;
pub type TtsRegistry = ProviderRegistry<dyn TtsProvider>;
pub type SearchRegistry = ProviderRegistry<dyn SearchProvider>;
pub type FlightRegistry = ProviderRegistry<dyn FlightProvider>;

impl ProviderRegistry<dyn LlmProvider> {
    pub async fn health_check(
        &self,
        name: &str,
        credentials: &CredentialStore,
        tenant: &TenantId,
    ) -> HealthReport {
        match self.get(name, credentials, tenant) {
            Ok(provider) => provider.health_check().await,
            Err(e) => HealthReport::not_configured(e.to_string()),
        }
    }
}

impl ProviderRegistry<dyn TtsProvider> {
    pub async fn health_check(
        &self,
        name: &str,
        credentials: &CredentialStore,
        tenant: &TenantId,
    ) -> HealthReport {
        match self.get(name, credentials, tenant) {
            Ok(provider) => provider.health_check().await,
            Err(e) => HealthReport::not_configured(e.to_string()),
        }
    }
}

impl ProviderRegistry<dyn SearchProvider> {
    pub async fn health_check(
        &self,
        name: &str,
        credentials: &CredentialStore,
        tenant: &TenantId,
    ) -> HealthReport {
        match self.get(name, credentials, tenant) {
            Ok(provider) => provider.health_check().await,
            Err(e) => HealthReport::not_configured(e.to_string()),
        }
    }
}

impl ProviderRegistry<dyn FlightProvider> {
    pub async fn health_check(
        &self,
        name: &str,
        credentials: &CredentialStore,
        tenant: &TenantId,
    ) -> HealthReport {
        match self.get(name, credentials, tenant) {
            Ok(provider) => provider.health_check().await,
            Err(e) => HealthReport::not_configured(e.to_string()),
        }
    }
}

/// Fetch the tenant's key for `provider` or fail as not-configured. A
/// decryption failure also lands here so the caller sees `not_configured`
/// rather than corrupted plaintext.
fn required_key(creds: &CredentialStore, tenant: &TenantId, provider: &str) -> Result<String> {
    match creds.get_key(tenant, provider) {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Err(ProviderError::NotConfigured(format!(
            "{} has no API key for tenant {}",
            provider, tenant
        ))),
        Err(e) => Err(ProviderError::NotConfigured(e.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Built-in registrations
// ---------------------------------------------------------------------------

pub fn builtin_llm_registry() -> LlmRegistry {
    let registry = LlmRegistry::new();

    registry.register(
        ProviderInfo {
            name: "anthropic",
            display: "Anthropic (Claude)",
            requires_api_key: true,
            is_free: false,
            pricing: Some("per-token"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "anthropic")?;
            Ok(Arc::new(AnthropicProvider::new(shared_client(), key)) as Arc<dyn LlmProvider>)
        }),
    );

    registry.register(
        ProviderInfo {
            name: "openai",
            display: "OpenAI",
            requires_api_key: true,
            is_free: false,
            pricing: Some("per-token"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "openai")?;
            Ok(Arc::new(OpenAiCompatProvider::openai(shared_client(), key))
                as Arc<dyn LlmProvider>)
        }),
    );

    registry.register(
        ProviderInfo {
            name: "gemini",
            display: "Google AI (Gemini)",
            requires_api_key: true,
            is_free: true,
            pricing: Some("per-token, free tier"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "gemini")?;
            Ok(Arc::new(OpenAiCompatProvider::gemini(shared_client(), key))
                as Arc<dyn LlmProvider>)
        }),
    );

    registry.register(
        ProviderInfo {
            name: "ollama",
            display: "Ollama (local)",
            requires_api_key: false,
            is_free: true,
            pricing: None,
        },
        Arc::new(|_creds, _tenant| {
            Ok(Arc::new(OllamaProvider::new(shared_client(), None)) as Arc<dyn LlmProvider>)
        }),
    );

    registry.register(
        ProviderInfo {
            name: "openrouter",
            display: "OpenRouter",
            requires_api_key: true,
            is_free: false,
            pricing: Some("per-token"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "openrouter")?;
            Ok(
                Arc::new(OpenAiCompatProvider::openrouter(shared_client(), key))
                    as Arc<dyn LlmProvider>,
            )
        }),
    );

    registry
}

pub fn builtin_tts_registry() -> TtsRegistry {
    let registry = TtsRegistry::new();

    registry.register(
        ProviderInfo {
            name: "openai",
            display: "OpenAI TTS",
            requires_api_key: true,
            is_free: false,
            pricing: Some("per-character"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "openai")?;
            Ok(Arc::new(OpenAiTts::new(shared_client(), key)) as Arc<dyn TtsProvider>)
        }),
    );

    registry.register(
        ProviderInfo {
            name: "kokoro",
            display: "Kokoro (self-hosted)",
            requires_api_key: false,
            is_free: true,
            pricing: None,
        },
        Arc::new(|_creds, _tenant| {
            Ok(Arc::new(KokoroTts::new(shared_client(), None)) as Arc<dyn TtsProvider>)
        }),
    );

    registry.register(
        ProviderInfo {
            name: "elevenlabs",
            display: "ElevenLabs",
            requires_api_key: true,
            is_free: false,
            pricing: Some("per-character"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "elevenlabs")?;
            Ok(Arc::new(ElevenLabsTts::new(shared_client(), key)) as Arc<dyn TtsProvider>)
        }),
    );

    registry
}

pub fn builtin_search_registry() -> SearchRegistry {
    let registry = SearchRegistry::new();

    registry.register(
        ProviderInfo {
            name: "brave",
            display: "Brave Search",
            requires_api_key: true,
            is_free: true,
            pricing: Some("free tier, then per-request"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "brave")?;
            Ok(Arc::new(BraveSearch::new(shared_client(), key)) as Arc<dyn SearchProvider>)
        }),
    );

    registry.register(
        ProviderInfo {
            name: "google",
            display: "Google (SerpAPI)",
            requires_api_key: true,
            is_free: false,
            pricing: Some("per-request"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "serpapi")?;
            Ok(Arc::new(SerpApiSearch::new(shared_client(), key)) as Arc<dyn SearchProvider>)
        }),
    );

    registry
}

pub fn builtin_flight_registry() -> FlightRegistry {
    let registry = FlightRegistry::new();

    registry.register(
        ProviderInfo {
            name: "amadeus",
            display: "Amadeus",
            requires_api_key: true,
            is_free: false,
            pricing: Some("per-request"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "amadeus")?;
            Ok(Arc::new(AmadeusFlights::from_credential(shared_client(), &key))
                as Arc<dyn FlightProvider>)
        }),
    );

    registry.register(
        ProviderInfo {
            name: "google_flights",
            display: "Google Flights (SerpAPI)",
            requires_api_key: true,
            is_free: false,
            pricing: Some("per-request"),
        },
        Arc::new(|creds, tenant| {
            let key = required_key(creds, tenant, "serpapi")?;
            Ok(Arc::new(GoogleFlights::new(shared_client(), key)) as Arc<dyn FlightProvider>)
        }),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn creds() -> CredentialStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::credentials::init_db(&conn).unwrap();
        CredentialStore::new(Arc::new(Mutex::new(conn)), None)
    }

    #[test]
    fn builtin_llm_registry_lists_all_providers() {
        let reg = builtin_llm_registry();
        let names: Vec<_> = reg.list().iter().map(|i| i.name).collect();
        for expected in ["anthropic", "openai", "gemini", "ollama", "openrouter"] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let reg = builtin_llm_registry();
        let err = reg
            .get("clippy-gpt", &creds(), &TenantId::default_tenant())
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
    }

    #[test]
    fn missing_key_surfaces_as_not_configured() {
        let reg = builtin_llm_registry();
        let err = reg
            .get("anthropic", &creds(), &TenantId::default_tenant())
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[test]
    fn keyless_provider_instantiates_without_credentials() {
        let reg = builtin_llm_registry();
        let provider = reg
            .get("ollama", &creds(), &TenantId::default_tenant())
            .unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn tenant_scoped_instantiation() {
        let reg = builtin_llm_registry();
        let creds = creds();
        let a = TenantId::new("a");
        creds.store_key(&a, "anthropic", "sk-ant-a").unwrap();

        assert!(reg.get("anthropic", &creds, &a).is_ok());
        assert!(reg
            .get("anthropic", &creds, &TenantId::new("b"))
            .is_err());
    }

    #[tokio::test]
    async fn health_check_reports_not_configured() {
        let reg = builtin_llm_registry();
        let report = reg
            .health_check("anthropic", &creds(), &TenantId::default_tenant())
            .await;
        assert_eq!(report.state, crate::types::HealthState::NotConfigured);
    }
}
