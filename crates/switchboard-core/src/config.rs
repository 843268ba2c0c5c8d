use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default provider call timeouts (seconds). LLM is generous because local
/// CPU-bound inference can take minutes.
pub const LLM_TIMEOUT_SECS: u64 = 600;
pub const TTS_TIMEOUT_SECS: u64 = 90;
pub const HEALTH_TIMEOUT_SECS: u64 = 10;

/// Top-level config (`switchboard.toml` + `SWITCHBOARD_*` env overrides).
///
/// The loop-prevention knobs additionally honor the bare environment
/// variables the deployment scripts already set (`THREAD_ABSOLUTE_MAX_TURNS`
/// and friends) — see [`SwitchboardConfig::load`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub thread: ThreadLimits,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Comma-separated regex additions applied on top of the base
    /// contamination pattern set (`CONTAMINATION_PATTERNS_EXTRA`).
    #[serde(default)]
    pub contamination_patterns_extra: Vec<String>,
    /// When set, the instance bound to this phone number runs in DM-auto-off
    /// "safe mode" so QA traffic never triggers auto replies.
    #[serde(default)]
    pub qa_phone_number: Option<String>,
    /// Base64-encoded 32-byte master key for tenant credential encryption.
    #[serde(default)]
    pub credential_master_key: Option<String>,
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            thread: ThreadLimits::default(),
            memory: MemoryConfig::default(),
            watcher: WatcherConfig::default(),
            maintenance: MaintenanceConfig::default(),
            contamination_patterns_extra: Vec::new(),
            qa_phone_number: None,
            credential_master_key: None,
        }
    }
}

impl SwitchboardConfig {
    /// Load `switchboard.toml`, layer `SWITCHBOARD_*` env overrides, then
    /// apply the bare loop-prevention env vars enumerated in the ops runbook.
    pub fn load() -> Result<Self, figment::Error> {
        let mut config: SwitchboardConfig = Figment::new()
            .merge(figment::providers::Serialized::defaults(
                SwitchboardConfig::default(),
            ))
            .merge(Toml::file("switchboard.toml"))
            .merge(Env::prefixed("SWITCHBOARD_").split("__"))
            .extract()?;

        config.thread.apply_bare_env();
        if let Ok(extra) = std::env::var("CONTAMINATION_PATTERNS_EXTRA") {
            config.contamination_patterns_extra.extend(
                extra
                    .split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty()),
            );
        }
        if let Ok(qa) = std::env::var("QA_PHONE_NUMBER") {
            if !qa.trim().is_empty() {
                config.qa_phone_number = Some(qa.trim().to_string());
            }
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Root for per-tool sandbox workspaces.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            workspace_root: default_workspace_root(),
        }
    }
}

/// Conversation-thread loop-prevention limits (§ safety gates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadLimits {
    /// Hard cap on turns before a thread is force-closed.
    #[serde(default = "default_max_turns")]
    pub absolute_max_turns: u32,
    /// Force-close when this many messages land on a thread inside 60 s.
    #[serde(default = "default_max_messages_per_minute")]
    pub max_messages_per_minute: usize,
    /// Force-close threads older than this many minutes.
    #[serde(default = "default_max_duration_minutes")]
    pub max_duration_minutes: i64,
    /// Mark a thread `timeout` when a reply arrives after this much idle time.
    #[serde(default = "default_inactivity_minutes")]
    pub inactivity_timeout_minutes: i64,
    /// Quiet period after any thread closes for the same sender.
    #[serde(default = "default_post_completion_secs")]
    pub post_completion_block_seconds: i64,
    /// Longer quiet period after a force-closed (loop-prevention) thread.
    #[serde(default = "default_loop_closure_secs")]
    pub loop_closure_block_seconds: i64,
}

impl Default for ThreadLimits {
    fn default() -> Self {
        Self {
            absolute_max_turns: default_max_turns(),
            max_messages_per_minute: default_max_messages_per_minute(),
            max_duration_minutes: default_max_duration_minutes(),
            inactivity_timeout_minutes: default_inactivity_minutes(),
            post_completion_block_seconds: default_post_completion_secs(),
            loop_closure_block_seconds: default_loop_closure_secs(),
        }
    }
}

impl ThreadLimits {
    /// Honor the bare (unprefixed) env vars that predate the toml config.
    fn apply_bare_env(&mut self) {
        if let Some(v) = bare_env("THREAD_ABSOLUTE_MAX_TURNS") {
            self.absolute_max_turns = v as u32;
        }
        if let Some(v) = bare_env("THREAD_MAX_MESSAGES_PER_MINUTE") {
            self.max_messages_per_minute = v as usize;
        }
        if let Some(v) = bare_env("THREAD_MAX_DURATION_MINUTES") {
            self.max_duration_minutes = v;
        }
        if let Some(v) = bare_env("POST_COMPLETION_BLOCK_SECONDS") {
            self.post_completion_block_seconds = v;
        }
        if let Some(v) = bare_env("LOOP_CLOSURE_BLOCK_SECONDS") {
            self.loop_closure_block_seconds = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Working ring size per (agent, memory key).
    #[serde(default = "default_memory_size")]
    pub working_size: usize,
    /// Top-k for episodic recall.
    #[serde(default = "default_semantic_results")]
    pub semantic_results: usize,
    /// Minimum similarity for an episodic hit to be injected.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Hard cap on the rendered context prefix, in characters.
    #[serde(default = "default_context_char_limit")]
    pub context_char_limit: usize,
    /// User messages accumulated before automatic fact extraction fires.
    #[serde(default = "default_extraction_min_messages")]
    pub extraction_min_user_messages: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            working_size: default_memory_size(),
            semantic_results: default_semantic_results(),
            similarity_threshold: default_similarity_threshold(),
            context_char_limit: default_context_char_limit(),
            extraction_min_user_messages: default_extraction_min_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Debounce window so rapid messages from one chat collapse into a
    /// single reply turn.
    #[serde(default)]
    pub conversation_delay_ms: u64,
    /// Instances younger than this start from their creation time instead of
    /// the last-seen watermark, skipping transport-side history sync.
    #[serde(default = "default_new_instance_grace_secs")]
    pub new_instance_grace_secs: i64,
    /// Keepalive window before the health monitor asks for a restart.
    #[serde(default = "default_keepalive_timeout_secs")]
    pub keepalive_timeout_secs: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            conversation_delay_ms: 0,
            new_instance_grace_secs: default_new_instance_grace_secs(),
            keepalive_timeout_secs: default_keepalive_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_maintenance_message")]
    pub message: String,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            message: default_maintenance_message(),
        }
    }
}

fn bare_env(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn default_db_path() -> String {
    "./data/switchboard.db".to_string()
}

fn default_workspace_root() -> String {
    "./data/workspace".to_string()
}

fn default_max_turns() -> u32 {
    25
}

fn default_max_messages_per_minute() -> usize {
    15
}

fn default_max_duration_minutes() -> i64 {
    30
}

fn default_inactivity_minutes() -> i64 {
    30
}

fn default_post_completion_secs() -> i64 {
    300
}

fn default_loop_closure_secs() -> i64 {
    1800
}

fn default_memory_size() -> usize {
    10
}

fn default_semantic_results() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_context_char_limit() -> usize {
    50_000
}

fn default_extraction_min_messages() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_new_instance_grace_secs() -> i64 {
    300
}

fn default_keepalive_timeout_secs() -> u64 {
    90
}

fn default_maintenance_message() -> String {
    "The assistant is under maintenance. Please try again later.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runbook() {
        let limits = ThreadLimits::default();
        assert_eq!(limits.absolute_max_turns, 25);
        assert_eq!(limits.max_messages_per_minute, 15);
        assert_eq!(limits.max_duration_minutes, 30);
        assert_eq!(limits.post_completion_block_seconds, 300);
        assert_eq!(limits.loop_closure_block_seconds, 1800);
    }

    #[test]
    fn memory_defaults() {
        let mem = MemoryConfig::default();
        assert_eq!(mem.working_size, 10);
        assert!((mem.similarity_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(mem.context_char_limit, 50_000);
    }
}
