//! # Error Classification
//!
//! Centralized classification of backend transport failures into a closed set
//! of error kinds. The underlying spreadsheet client libraries report failures
//! as free-form message text, so classification is an intentionally coarse
//! substring match performed once, at the backend boundary, when a
//! [`BackendError`](crate::backend::BackendError) is constructed. Nothing
//! downstream ever inspects message text again.

use serde::{Deserialize, Serialize};

/// Closed taxonomy of backend failure kinds.
///
/// The kind drives two independent reactions: the rate limiter escalates its
/// inter-call spacing for pressure-related kinds, and the health monitor keeps
/// per-kind counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The remote service's usage quota was exceeded.
    Quota,
    /// Explicit throttling without a hard quota signal.
    RateLimited,
    /// The call did not complete in time.
    Timeout,
    /// Socket-level or network failures.
    Connectivity,
    /// Permission or credential problems; a configuration issue, not load.
    Authentication,
    /// Anything that matched no known pattern.
    Unknown,
}

impl ErrorKind {
    /// Whether this kind should widen the rate limiter's inter-call spacing.
    ///
    /// Authentication failures are a configuration problem and unknown
    /// failures carry no pressure signal; neither touches the limiter.
    pub fn escalates_rate_limit(self) -> bool {
        matches!(
            self,
            ErrorKind::Quota | ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::Connectivity
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Quota => "quota",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Quota patterns are matched before RateLimited so "rate limit exceeded"
// counts as quota exhaustion. That precedence is operational behavior the
// surrounding integrations depend on.
const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "rate limit exceeded",
    "limit exceeded",
    "resource_exhausted",
    "429",
];

const RATE_LIMITED_PATTERNS: &[&str] = &["rate limit", "too many requests", "throttl"];

const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out", "deadline"];

const CONNECTIVITY_PATTERNS: &[&str] = &[
    "econnreset",
    "econnrefused",
    "enotfound",
    "etimedout",
    "socket",
    "network",
    "connection",
];

const AUTHENTICATION_PATTERNS: &[&str] = &[
    "unauthorized",
    "permission",
    "forbidden",
    "invalid_grant",
    "credential",
    "401",
    "403",
];

/// Classify a transport error message into an [`ErrorKind`].
///
/// Matching is case-insensitive. The first pattern table that matches wins;
/// tables are consulted in the order quota, rate-limited, timeout,
/// connectivity, authentication.
pub fn classify(message: &str) -> ErrorKind {
    let message = message.to_lowercase();
    let matches_any = |patterns: &[&str]| patterns.iter().any(|p| message.contains(p));

    if matches_any(QUOTA_PATTERNS) {
        ErrorKind::Quota
    } else if matches_any(RATE_LIMITED_PATTERNS) {
        ErrorKind::RateLimited
    } else if matches_any(TIMEOUT_PATTERNS) {
        ErrorKind::Timeout
    } else if matches_any(CONNECTIVITY_PATTERNS) {
        ErrorKind::Connectivity
    } else if matches_any(AUTHENTICATION_PATTERNS) {
        ErrorKind::Authentication
    } else {
        ErrorKind::Unknown
    }
}
