//! End-to-end turns through the thread engine with a scripted LLM.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use switchboard_agent::contamination::DetectorCache;
use switchboard_agent::sentinel::SentinelMode;
use switchboard_agent::{AgentProfile, AgentService};
use switchboard_core::config::ThreadLimits;
use switchboard_core::types::{IsolationMode, TenantId};
use switchboard_memory::shared::SharedKnowledgePool;
use switchboard_providers::credentials::CredentialStore;
use switchboard_providers::llm::{ChatCompletion, ChatRequest, LlmProvider};
use switchboard_providers::types::{ProviderResponse, UsageUnits};
use switchboard_providers::usage::UsageTracker;
use switchboard_providers::{LlmRegistry, ProviderRegistry};
use switchboard_sandbox::SandboxExecutor;
use switchboard_skills::{SkillContext, SkillManager};
use switchboard_threads::db::ThreadStore;
use switchboard_threads::engine::{ThreadEngine, STAGNATION_FAREWELL};
use switchboard_threads::{ConversationThread, ThreadStatus};

/// LLM stub that always answers with the configured text.
#[derive(Debug)]
struct Scripted(&'static str);

#[async_trait]
impl LlmProvider for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, req: &ChatRequest) -> ProviderResponse<ChatCompletion> {
        ProviderResponse::ok(
            "scripted",
            ChatCompletion {
                content: self.0.to_string(),
                tool_calls: Vec::new(),
            },
            Some(UsageUnits {
                prompt_units: req.system.len() as u64 / 4,
                completion_units: self.0.len() as u64 / 4,
            }),
        )
    }
}

struct Harness {
    engine: ThreadEngine,
    store: Arc<ThreadStore>,
    profile: AgentProfile,
    skill_ctx: SkillContext,
    tenant: TenantId,
}

fn harness(reply: &'static str) -> Harness {
    let conn = Connection::open_in_memory().unwrap();
    switchboard_threads::db::init_db(&conn).unwrap();
    switchboard_contacts::db::init_db(&conn).unwrap();
    switchboard_memory::db::init_db(&conn).unwrap();
    switchboard_providers::credentials::init_db(&conn).unwrap();
    switchboard_providers::usage::init_db(&conn).unwrap();
    switchboard_sandbox::db::init_db(&conn).unwrap();
    switchboard_skills::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let llm: Arc<LlmRegistry> = Arc::new(ProviderRegistry::new());
    llm.register(
        switchboard_providers::types::ProviderInfo {
            name: "scripted",
            display: "Scripted",
            requires_api_key: false,
            is_free: true,
            pricing: None,
        },
        Arc::new(move |_creds, _tenant| {
            Ok(Arc::new(Scripted(reply)) as Arc<dyn LlmProvider>)
        }),
    );

    let credentials = Arc::new(CredentialStore::new(Arc::clone(&db), None));
    let skills = Arc::new(SkillManager::with_builtins(Arc::clone(&db)));
    let sandbox = Arc::new(SandboxExecutor::new(
        Arc::clone(&db),
        std::env::temp_dir().join("sb-thread-tests"),
        None,
    ));
    let agent_service = Arc::new(AgentService::new(
        llm,
        Arc::clone(&credentials),
        Arc::new(UsageTracker::new(Arc::clone(&db))),
        Arc::clone(&skills),
        sandbox,
        Arc::new(DetectorCache::new(vec![])),
        SentinelMode::Block,
    ));

    let store = Arc::new(ThreadStore::new(Arc::clone(&db)));
    let engine = ThreadEngine::new(
        Arc::clone(&store),
        ThreadLimits::default(),
        agent_service,
    );

    let tenant = TenantId::default_tenant();
    let profile = AgentProfile {
        id: 1,
        tenant_id: tenant.clone(),
        name: "courier".to_string(),
        model_provider: "scripted".to_string(),
        model_name: "scripted-1".to_string(),
        system_prompt: "You navigate external bots on behalf of the user.".to_string(),
        response_template: "{response}".to_string(),
        isolation_mode: IsolationMode::Isolated,
        contamination_patterns: Vec::new(),
    };
    let skill_ctx = SkillContext {
        tenant: tenant.clone(),
        agent_id: 1,
        sender_key: "5511777770000".to_string(),
        search: Arc::new(switchboard_providers::builtin_search_registry()),
        flights: Arc::new(switchboard_providers::builtin_flight_registry()),
        credentials,
        shared_pool: Arc::new(SharedKnowledgePool::new(db)),
        transcriber: None,
    };

    Harness {
        engine,
        store,
        profile,
        skill_ctx,
        tenant,
    }
}

fn tracking_thread(h: &Harness) -> ConversationThread {
    h.store
        .create(
            &h.tenant,
            1,
            "5511777770000",
            "obter status rastreio 1234567890123",
            10,
            None,
        )
        .unwrap()
}

#[tokio::test]
async fn interactive_menu_short_circuits_with_tracking_match() {
    let h = harness("should never be called");
    let thread = tracking_thread(&h);

    let payload = r#"{"type":"list","sections":[{"rows":[{"title":"Outro"},{"title":"1234567890123 — em trânsito"}]}]}"#;
    let reply = h
        .engine
        .process_reply(thread.id, &h.profile, &h.skill_ctx, payload, Some("m1"))
        .await
        .unwrap();

    assert!(reply.should_reply);
    assert_eq!(reply.reply_content.as_deref(), Some("1234567890123 — em trânsito"));
    assert_eq!(reply.current_turn, 1);
    assert_eq!(reply.status, ThreadStatus::Active);
}

#[tokio::test]
async fn status_acknowledgment_closes_with_data_retrieved() {
    let h = harness("Entendido, um momento.");
    let thread = tracking_thread(&h);

    // Turn 1: something mundane so the thread passes the turn-2 gate.
    h.engine
        .process_reply(thread.id, &h.profile, &h.skill_ctx, "Digite o número do pedido", Some("m1"))
        .await
        .unwrap();

    let reply = h
        .engine
        .process_reply(
            thread.id,
            &h.profile,
            &h.skill_ctx,
            "Seu pedido está em trânsito, previsão para 2026-02-14.",
            Some("m2"),
        )
        .await
        .unwrap();

    assert_eq!(reply.reply_content.as_deref(), Some("Perfeito, obrigado!"));
    assert!(reply.goal_achieved);
    let saved = h.engine.store().get(thread.id).unwrap();
    assert_eq!(
        saved.goal_summary.as_deref(),
        Some("Data successfully retrieved from external bot")
    );
    assert!(saved.completed_at.is_some());
}

#[tokio::test]
async fn contaminated_reply_is_blocked_and_thread_closed() {
    let h = harness("@movl: Compreendido, vou ajudá-lo com isso.");
    let thread = tracking_thread(&h);

    let reply = h
        .engine
        .process_reply(
            thread.id,
            &h.profile,
            &h.skill_ctx,
            "Olá! Como posso ajudar?",
            Some("m1"),
        )
        .await
        .unwrap();

    assert!(!reply.should_reply);
    assert!(reply.reply_content.is_none());
    let saved = h.engine.store().get(thread.id).unwrap();
    assert_eq!(saved.status, ThreadStatus::Completed);
    assert!(!saved.goal_achieved);
    assert!(saved
        .goal_summary
        .as_deref()
        .unwrap()
        .starts_with("CONTAMINATION DETECTED:"));
}

#[tokio::test]
async fn absolute_turn_cap_forces_closure_and_cooldown() {
    let h = harness("ok");
    let thread = tracking_thread(&h);

    let mut t = h.store.get(thread.id).unwrap();
    t.current_turn = 25;
    h.store.save(&t).unwrap();

    let reply = h
        .engine
        .process_reply(thread.id, &h.profile, &h.skill_ctx, "mais uma", Some("m1"))
        .await
        .unwrap();

    assert!(!reply.should_reply);
    let saved = h.engine.store().get(thread.id).unwrap();
    assert_eq!(saved.status, ThreadStatus::Completed);
    assert_eq!(
        saved.goal_summary.as_deref(),
        Some("FORCED CLOSURE: Exceeded 25 turns (loop prevention)")
    );

    // Force-closed threads extend the quiet period; messages from the same
    // sender are dropped.
    assert!(h
        .engine
        .should_block_post_completion(&h.tenant, "5511777770000"));
    assert!(!h
        .engine
        .should_block_post_completion(&h.tenant, "5599999999999"));
}

#[tokio::test]
async fn duplicate_message_id_is_dropped() {
    let h = harness("Entendido.");
    let thread = tracking_thread(&h);

    let first = h
        .engine
        .process_reply(thread.id, &h.profile, &h.skill_ctx, "oi", Some("dup-1"))
        .await
        .unwrap();
    assert!(first.should_reply);
    let turns_after_first = h.engine.store().get(thread.id).unwrap().current_turn;

    let second = h
        .engine
        .process_reply(thread.id, &h.profile, &h.skill_ctx, "oi", Some("dup-1"))
        .await
        .unwrap();
    assert!(!second.should_reply);
    assert_eq!(
        h.engine.store().get(thread.id).unwrap().current_turn,
        turns_after_first
    );
}

#[tokio::test]
async fn session_reset_escalates_menu_then_zero() {
    let h = harness("should not reach the model");
    let thread = tracking_thread(&h);

    let first = h
        .engine
        .process_reply(
            thread.id,
            &h.profile,
            &h.skill_ctx,
            "Há mais algo que eu possa fazer por você?",
            Some("m1"),
        )
        .await
        .unwrap();
    assert_eq!(first.reply_content.as_deref(), Some("menu"));

    let second = h
        .engine
        .process_reply(
            thread.id,
            &h.profile,
            &h.skill_ctx,
            "Posso ajudar com mais alguma coisa?",
            Some("m2"),
        )
        .await
        .unwrap();
    assert_eq!(second.reply_content.as_deref(), Some("0"));
}

#[tokio::test]
async fn repeating_exchange_triggers_stagnation_farewell() {
    let h = harness("Quero rastrear meu pedido 1234567890123");
    let thread = tracking_thread(&h);

    let mut last = None;
    for i in 0..4 {
        last = Some(
            h.engine
                .process_reply(
                    thread.id,
                    &h.profile,
                    &h.skill_ctx,
                    "Não entendi. Pode repetir?",
                    Some(&format!("m{}", i)),
                )
                .await
                .unwrap(),
        );
        let saved = h.engine.store().get(thread.id).unwrap();
        if saved.status != ThreadStatus::Active {
            break;
        }
    }

    let saved = h.engine.store().get(thread.id).unwrap();
    assert_eq!(saved.status, ThreadStatus::Completed);
    assert!(!saved.goal_achieved);
    assert_eq!(
        last.unwrap().reply_content.as_deref(),
        Some(STAGNATION_FAREWELL)
    );
}

#[tokio::test]
async fn completed_at_tracks_terminal_status() {
    let h = harness("Entendido.");
    let thread = tracking_thread(&h);

    let active = h.engine.store().get(thread.id).unwrap();
    assert_eq!(active.status, ThreadStatus::Active);
    assert!(active.completed_at.is_none());

    let mut t = active;
    t.current_turn = 25;
    h.store.save(&t).unwrap();
    h.engine
        .process_reply(thread.id, &h.profile, &h.skill_ctx, "x", Some("m1"))
        .await
        .unwrap();

    let closed = h.engine.store().get(thread.id).unwrap();
    assert!(closed.status.is_terminal());
    assert!(closed.completed_at.is_some());
}
