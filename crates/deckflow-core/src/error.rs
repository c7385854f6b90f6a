//! Error types for Deckflow Core
//!
//! Three families, matching how each is surfaced:
//! - Gating errors: rejected locally, never reach the network
//! - Remote (transport) errors: always become an explicit state change
//! - Configuration errors: raised while loading settings

use deckflow_model::{SlideId, StageKind, StepStatus};
use std::path::PathBuf;
use std::time::Duration;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Request rejected before any network call
    #[error("rejected: {0}")]
    Gating(#[from] GatingError),

    /// Remote call failed or timed out
    #[error("transport error: {0}")]
    Transport(#[from] RemoteError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Whether the request was rejected locally
    #[inline]
    #[must_use]
    pub fn is_gating(&self) -> bool {
        matches!(self, Self::Gating(_))
    }

    /// Whether a remote call failed
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether retrying the same request could succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Gating(_) | Self::Config(_) => false,
        }
    }
}

/// Requests disallowed by the dependency graph or by in-flight work
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatingError {
    /// Stage has no run endpoint
    #[error("stage {0} cannot be run by the client")]
    NotRunnable(StageKind),

    /// Predecessor not completed
    #[error("stage {stage} is not enabled (predecessor status: {blocking:?})")]
    NotEnabled {
        /// Requested stage
        stage: StageKind,
        /// Status of the blocking predecessor, if any
        blocking: Option<StepStatus>,
    },

    /// Stage already running
    #[error("stage {0} is already processing")]
    AlreadyProcessing(StageKind),

    /// Another suggestion write has not settled
    #[error("a suggestion is already being applied")]
    ApplyInFlight,

    /// Single-slide patch targets a slide that does not exist
    #[error("slide not found: {0}")]
    UnknownSlide(SlideId),

    /// Facade was shut down
    #[error("orchestrator has been shut down")]
    TornDown,
}

/// Remote sync client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// No acknowledgement within the bounded wait
    #[error("no response after {after_ms}ms")]
    Timeout {
        /// Wait budget that elapsed
        after_ms: u64,
    },

    /// Non-success HTTP status
    #[error("remote returned {code}: {message}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response body or reason
        message: String,
    },

    /// Presentation does not exist
    #[error("presentation not found: {0}")]
    NotFound(String),

    /// Response could not be decoded at all
    #[error("decode error: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Timeout error for an elapsed budget
    #[inline]
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Whether a retry could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Status { code, .. } => *code >= 500 || *code == 429,
            Self::NotFound(_) | Self::Decode(_) => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or type error
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// Why it is invalid
        reason: String,
    },
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create invalid value error
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gating_error_display() {
        let err = GatingError::NotEnabled {
            stage: StageKind::Illustration,
            blocking: Some(StepStatus::Pending),
        };
        assert!(err.to_string().contains("illustration is not enabled"));
    }

    #[test]
    fn orchestrator_error_classification() {
        let gating = OrchestratorError::from(GatingError::AlreadyProcessing(StageKind::Slides));
        assert!(gating.is_gating());
        assert!(!gating.is_retryable());

        let transport = OrchestratorError::from(RemoteError::timeout(Duration::from_secs(30)));
        assert!(transport.is_transport());
        assert!(transport.is_retryable());
    }

    #[test]
    fn remote_error_is_retryable() {
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(RemoteError::Status {
            code: 503,
            message: String::new()
        }
        .is_retryable());
        assert!(!RemoteError::Status {
            code: 400,
            message: String::new()
        }
        .is_retryable());
        assert!(!RemoteError::NotFound("p".into()).is_retryable());
    }

    #[test]
    fn timeout_reports_millis() {
        let err = RemoteError::timeout(Duration::from_millis(1500));
        assert_eq!(err, RemoteError::Timeout { after_ms: 1500 });
        assert_eq!(err.to_string(), "no response after 1500ms");
    }
}
