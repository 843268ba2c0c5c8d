//! Shared HTTP plumbing for provider calls.

use std::time::Duration;

use crate::types::FailureKind;

/// One client per process; providers clone it (reqwest clients are cheap
/// handles over a shared pool).
pub fn shared_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_default()
}

/// Map a transport-level error to the uniform failure taxonomy.
pub fn classify_transport(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::UpstreamError
    }
}

/// Map an HTTP status to the uniform failure taxonomy.
pub fn classify_status(status: reqwest::StatusCode) -> FailureKind {
    match status.as_u16() {
        401 | 403 => FailureKind::AuthFailed,
        429 => FailureKind::RateLimited,
        408 | 504 => FailureKind::Timeout,
        _ => FailureKind::UpstreamError,
    }
}
