//! Subsystem wiring on a root context — no ambient globals, so tests can
//! construct an isolated copy of anything here.

use std::sync::{Arc, Mutex};

use anyhow::Context;
use rusqlite::Connection;
use tracing::{info, warn};

use switchboard_agent::contamination::DetectorCache;
use switchboard_agent::sentinel::SentinelMode;
use switchboard_agent::AgentService;
use switchboard_contacts::ContactDirectory;
use switchboard_core::config::SwitchboardConfig;
use switchboard_core::send::ChannelSend;
use switchboard_core::types::{Channel, TenantId};
use switchboard_memory::agent_memory::AgentMemoryConfig;
use switchboard_memory::vector::{HashEmbedder, SqliteVectorStore};
use switchboard_memory::MemoryManager;
use switchboard_providers::credentials::CredentialStore;
use switchboard_providers::usage::UsageTracker;
use switchboard_providers::{
    builtin_flight_registry, builtin_llm_registry, builtin_search_registry, builtin_tts_registry,
};
use switchboard_router::{Router, RouterDeps, TransportBinding};
use switchboard_sandbox::SandboxExecutor;
use switchboard_skills::SkillManager;
use switchboard_threads::db::ThreadStore;
use switchboard_threads::engine::ThreadEngine;
use switchboard_transport::filter::MessageFilter;
use switchboard_transport::instances::InstanceStore;
use switchboard_transport::sender::{ChannelSender, TelegramEndpoint, WhatsappEndpoint};
use switchboard_transport::WatcherManager;

pub struct App {
    watcher_manager: Arc<WatcherManager>,
}

impl App {
    pub async fn build(config: SwitchboardConfig) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&config.database.path)
            .with_context(|| format!("opening database at {}", config.database.path))?;
        init_schema(&conn)?;
        let db = Arc::new(Mutex::new(conn));

        let tenant = TenantId::default_tenant();

        // Leaf services.
        let credentials = Arc::new(CredentialStore::new(
            Arc::clone(&db),
            config.credential_master_key.as_deref(),
        ));
        let usage = Arc::new(UsageTracker::new(Arc::clone(&db)));
        let llm = Arc::new(builtin_llm_registry());
        let tts = Arc::new(builtin_tts_registry());
        let search = Arc::new(builtin_search_registry());
        let flights = Arc::new(builtin_flight_registry());

        let directory = Arc::new(ContactDirectory::new(Arc::clone(&db)));
        let memory = Arc::new(MemoryManager::new(
            Arc::clone(&db),
            Arc::new(SqliteVectorStore::new(Arc::clone(&db))),
            Arc::new(HashEmbedder),
            AgentMemoryConfig {
                memory_size: config.memory.working_size,
                auto_extract: true,
                extraction_min_user_messages: config.memory.extraction_min_user_messages,
                adaptive_personality: false,
            },
        ));

        // Channel-aware sender: endpoints resolve to the tenant's first
        // active AGENT instances.
        let instances = InstanceStore::new(Arc::clone(&db));
        let whatsapp_endpoint = instances
            .first_agent_whatsapp(&tenant)
            .ok()
            .flatten()
            .map(|i| WhatsappEndpoint {
                api_url: i.api_url,
                api_secret: i.api_secret,
            });
        let active = instances.list_active(&tenant).unwrap_or_default();
        let telegram_endpoint = active
            .iter()
            .find(|i| i.channel == Channel::Telegram && i.bot_token.is_some())
            .and_then(|i| i.bot_token.clone())
            .map(|bot_token| TelegramEndpoint { bot_token });
        let sender: Arc<dyn ChannelSend> =
            Arc::new(ChannelSender::new(whatsapp_endpoint, telegram_endpoint));

        // Agent-side services.
        let skills = Arc::new(SkillManager::with_builtins(Arc::clone(&db)));
        let sandbox = Arc::new(SandboxExecutor::new(
            Arc::clone(&db),
            config.database.workspace_root.clone(),
            Some(Arc::clone(&sender)),
        ));
        let detectors = Arc::new(DetectorCache::new(
            config.contamination_patterns_extra.clone(),
        ));
        let agent_service = Arc::new(AgentService::new(
            Arc::clone(&llm),
            Arc::clone(&credentials),
            usage,
            Arc::clone(&skills),
            sandbox,
            detectors,
            SentinelMode::Block,
        ));

        let thread_store = Arc::new(ThreadStore::new(Arc::clone(&db)));
        let thread_engine = Arc::new(ThreadEngine::new(
            thread_store,
            config.thread.clone(),
            Arc::clone(&agent_service),
        ));

        // One watcher (and router binding) per live instance.
        let watcher_manager = Arc::new(WatcherManager::new(config.watcher.clone(), None));
        if active.is_empty() {
            warn!("no active transport instances; the daemon will idle");
        }
        for instance in active {
            let binding = TransportBinding {
                channel: instance.channel,
                instance_id: Some(instance.id),
                is_group_handler: instance.is_group_handler,
            };
            let router = Arc::new(Router::new(
                RouterDeps {
                    tenant: tenant.clone(),
                    config: config.clone(),
                    db: Arc::clone(&db),
                    directory: Arc::clone(&directory),
                    memory: Arc::clone(&memory),
                    agent_service: Arc::clone(&agent_service),
                    thread_engine: Arc::clone(&thread_engine),
                    llm: Arc::clone(&llm),
                    search: Arc::clone(&search),
                    flights: Arc::clone(&flights),
                    tts: Arc::clone(&tts),
                    credentials: Arc::clone(&credentials),
                    sender: Arc::clone(&sender),
                    transcriber: None,
                },
                binding,
            ));
            let filter = MessageFilter {
                dm_auto_mode: true,
                qa_phone_number: config.qa_phone_number.clone(),
                ..Default::default()
            };
            watcher_manager
                .add_instance(instance, router, filter)
                .await;
        }

        info!(
            watchers = watcher_manager.active_count(),
            "switchboard ready"
        );
        Ok(Self { watcher_manager })
    }

    /// Block until SIGINT, then stop every watcher cooperatively.
    pub async fn run_until_shutdown(&self) {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested; stopping watchers");
        self.watcher_manager.shutdown().await;
    }
}

/// Idempotent schema init across every crate that owns tables.
fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    switchboard_contacts::db::init_db(conn)?;
    switchboard_memory::db::init_db(conn)?;
    switchboard_providers::credentials::init_db(conn)?;
    switchboard_providers::usage::init_db(conn)?;
    switchboard_sandbox::db::init_db(conn)?;
    switchboard_skills::db::init_db(conn)?;
    switchboard_threads::db::init_db(conn)?;
    switchboard_router::agents::init_db(conn)?;
    switchboard_router::dedup::init_db(conn)?;
    switchboard_router::runs::init_db(conn)?;
    switchboard_router::projects::init_db(conn)?;
    switchboard_transport::instances::init_db(conn)?;
    Ok(())
}
