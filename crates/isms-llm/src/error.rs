//! Model failure taxonomy
//!
//! Provider errors arrive as an HTTP status plus free text. They are folded
//! into a small set of kinds so callers can branch without string matching.

use thiserror::Error;

/// Coarse classification of a model failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelErrorKind {
    /// Rate limit or exhausted budget. Triggers deterministic fallback.
    Quota,
    /// Missing or rejected credentials.
    Auth,
    /// Provider refused the content.
    Blocked,
    /// Timeout, refused connection, DNS.
    Network,
    /// Anything else, including malformed provider responses.
    Other,
}

impl ModelErrorKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelErrorKind::Quota => "quota",
            ModelErrorKind::Auth => "auth",
            ModelErrorKind::Blocked => "blocked",
            ModelErrorKind::Network => "network",
            ModelErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ModelErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A failed call to the language model.
#[derive(Error, Debug, Clone)]
#[error("language model error ({kind}): {message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Quota, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Network, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Other, message)
    }

    /// Build an error from free text when no status code is available.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify_failure(None, &message);
        Self { kind, message }
    }

    pub fn is_quota(&self) -> bool {
        self.kind == ModelErrorKind::Quota
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        let kind = if err.is_timeout() || err.is_connect() {
            ModelErrorKind::Network
        } else {
            classify_failure(status, &err.to_string())
        };
        ModelError::new(kind, err.to_string())
    }
}

/// Classify a provider failure from its HTTP status and body text.
///
/// Status wins when it is decisive (429, 401, 403); otherwise the body is
/// scanned for the phrases providers use for each failure class.
pub fn classify_failure(status: Option<u16>, body: &str) -> ModelErrorKind {
    match status {
        Some(429) => return ModelErrorKind::Quota,
        Some(401) | Some(403) => return ModelErrorKind::Auth,
        _ => {}
    }

    let lower = body.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["quota", "429", "rate limit", "rate_limit", "exhausted"]) {
        ModelErrorKind::Quota
    } else if has(&["401", "403", "unauthorized", "invalid api key", "authentication"]) {
        ModelErrorKind::Auth
    } else if has(&["blocked", "safety"]) {
        ModelErrorKind::Blocked
    } else if has(&["timeout", "timed out", "connection", "network"]) {
        ModelErrorKind::Network
    } else {
        ModelErrorKind::Other
    }
}
