use serde::{Deserialize, Serialize};
use std::fmt;

/// Uniform failure modes across every provider family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    AuthFailed,
    NotConfigured,
    UpstreamError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::AuthFailed => "auth_failed",
            FailureKind::NotConfigured => "not_configured",
            FailureKind::UpstreamError => "upstream_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Usage blob forwarded to the usage tracker. Units are tokens for LLMs,
/// characters for TTS, requests for search.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageUnits {
    pub prompt_units: u64,
    pub completion_units: u64,
}

/// The common provider call envelope.
#[derive(Debug, Clone)]
pub struct ProviderResponse<T> {
    pub success: bool,
    pub payload: Option<T>,
    pub provider: String,
    pub error: Option<ProviderFailure>,
    pub usage: Option<UsageUnits>,
}

impl<T> ProviderResponse<T> {
    pub fn ok(provider: &str, payload: T, usage: Option<UsageUnits>) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            provider: provider.to_string(),
            error: None,
            usage,
        }
    }

    pub fn fail(provider: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            provider: provider.to_string(),
            error: Some(ProviderFailure {
                kind,
                message: message.into(),
            }),
            usage: None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    NotConfigured,
    Unavailable,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::NotConfigured => "not_configured",
            HealthState::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub latency_ms: Option<u64>,
    pub detail: Option<String>,
}

impl HealthReport {
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            state: HealthState::Healthy,
            latency_ms: Some(latency_ms),
            detail: None,
        }
    }

    pub fn not_configured(detail: impl Into<String>) -> Self {
        Self {
            state: HealthState::NotConfigured,
            latency_ms: None,
            detail: Some(detail.into()),
        }
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self {
            state: HealthState::Unavailable,
            latency_ms: None,
            detail: Some(detail.into()),
        }
    }

    pub fn degraded(latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            state: HealthState::Degraded,
            latency_ms: Some(latency_ms),
            detail: Some(detail.into()),
        }
    }
}

/// Static metadata shown in provider listings.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub display: &'static str,
    pub requires_api_key: bool,
    pub is_free: bool,
    pub pricing: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_helpers_set_success_flag() {
        let ok: ProviderResponse<&str> = ProviderResponse::ok("p", "payload", None);
        assert!(ok.success);
        assert!(ok.error.is_none());

        let fail: ProviderResponse<&str> =
            ProviderResponse::fail("p", FailureKind::Timeout, "took too long");
        assert!(!fail.success);
        assert_eq!(fail.failure_kind(), Some(FailureKind::Timeout));
    }
}
