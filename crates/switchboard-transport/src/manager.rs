//! Watcher lifecycle: hot add/remove, health monitoring, cooperative
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use switchboard_core::config::WatcherConfig;
use switchboard_core::types::Channel;
use switchboard_router::Router;

use crate::filter::MessageFilter;
use crate::instances::TransportInstance;
use crate::telegram::TelegramWatcher;
use crate::watcher::McpWatcher;

/// Called when an instance's keepalive lapses; the container-lifecycle
/// layer owns the actual restart.
pub type RestartHook = Arc<dyn Fn(i64) + Send + Sync>;

struct WatcherHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
    health_join: Option<JoinHandle<()>>,
}

pub struct WatcherManager {
    config: WatcherConfig,
    handles: DashMap<i64, WatcherHandle>,
    restart_hook: Option<RestartHook>,
}

impl WatcherManager {
    pub fn new(config: WatcherConfig, restart_hook: Option<RestartHook>) -> Self {
        Self {
            config,
            handles: DashMap::new(),
            restart_hook,
        }
    }

    /// Start a watcher for one instance. Replaces (and stops) any existing
    /// watcher for the same instance id.
    pub async fn add_instance(
        &self,
        instance: TransportInstance,
        router: Arc<Router>,
        filter: MessageFilter,
    ) {
        self.remove_instance(instance.id).await;

        let token = CancellationToken::new();
        let instance_id = instance.id;

        let join = match instance.channel {
            Channel::Telegram => {
                let bot_token = instance.bot_token.clone().unwrap_or_default();
                if bot_token.is_empty() {
                    warn!(instance = instance_id, "Telegram instance has no bot token; skipping");
                    return;
                }
                let watcher = Arc::new(TelegramWatcher::new(
                    instance_id,
                    bot_token,
                    router,
                    filter,
                    token.clone(),
                ));
                tokio::spawn(watcher.run())
            }
            Channel::Whatsapp => {
                let watcher = Arc::new(McpWatcher::new(
                    instance.clone(),
                    router,
                    filter,
                    self.config.clone(),
                    token.clone(),
                ));
                tokio::spawn(watcher.run())
            }
            Channel::Playground => {
                // The playground pushes through its own WS path; nothing to
                // poll.
                return;
            }
        };

        let health_join = (instance.channel == Channel::Whatsapp).then(|| {
            tokio::spawn(health_monitor(
                instance,
                self.config.keepalive_timeout_secs,
                token.clone(),
                self.restart_hook.clone(),
            ))
        });

        self.handles.insert(
            instance_id,
            WatcherHandle {
                token,
                join,
                health_join,
            },
        );
        info!(instance = instance_id, "watcher registered");
    }

    /// Stop and forget one watcher. Waits up to 5 s for a clean exit.
    pub async fn remove_instance(&self, instance_id: i64) {
        let Some((_, handle)) = self.handles.remove(&instance_id) else {
            return;
        };
        handle.token.cancel();
        if let Some(health) = handle.health_join {
            health.abort();
        }
        if tokio::time::timeout(Duration::from_secs(5), handle.join)
            .await
            .is_err()
        {
            warn!(instance = instance_id, "watcher did not stop in time");
        }
        info!(instance = instance_id, "watcher removed");
    }

    pub fn active_count(&self) -> usize {
        self.handles.len()
    }

    /// Cooperative shutdown of every watcher.
    pub async fn shutdown(&self) {
        let ids: Vec<i64> = self.handles.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.remove_instance(id).await;
        }
    }
}

/// Periodic keepalive probe against the MCP container. Consecutive failures
/// past the keepalive window trigger the restart hook.
async fn health_monitor(
    instance: TransportInstance,
    keepalive_timeout_secs: u64,
    token: CancellationToken,
    restart_hook: Option<RestartHook>,
) {
    let client = reqwest::Client::new();
    let probe_interval = Duration::from_secs(30);
    let mut last_healthy = std::time::Instant::now();

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(probe_interval) => {}
        }

        let healthy = client
            .get(format!(
                "{}/health",
                instance.api_url.trim_end_matches('/')
            ))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false);

        if healthy {
            last_healthy = std::time::Instant::now();
            continue;
        }

        if last_healthy.elapsed() > Duration::from_secs(keepalive_timeout_secs) {
            warn!(
                instance = instance.id,
                silent_secs = last_healthy.elapsed().as_secs(),
                "keepalive timeout; requesting container restart"
            );
            if let Some(hook) = &restart_hook {
                hook(instance.id);
            }
            last_healthy = std::time::Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn remove_of_unknown_instance_is_a_noop() {
        let manager = WatcherManager::new(WatcherConfig::default(), None);
        manager.remove_instance(99).await;
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn shutdown_with_no_watchers_returns() {
        let manager = WatcherManager::new(WatcherConfig::default(), None);
        manager.shutdown().await;
        assert_eq!(manager.active_count(), 0);
    }
}
