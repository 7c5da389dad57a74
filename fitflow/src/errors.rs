//! Error types for the fitflow orchestration engine.
//!
//! Errors fall into three families:
//! - [`FitflowError`] for orchestrator contract violations and configuration
//!   problems, raised immediately and never retried
//! - [`RemoteError`] for failures of a remote model call, classified as
//!   retryable or terminal by the resilience layer
//! - [`CircuitOpenError`] when a dependency's circuit breaker rejects a call

use crate::core::PipelineStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// The main error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum FitflowError {
    /// An operation was invoked while the pipeline was in a status that does
    /// not allow it.
    #[error("Cannot {operation} while pipeline is {status}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The pipeline status at the time of the call.
        status: PipelineStatus,
    },

    /// A step id was not found in the catalog.
    #[error("Unknown step: {0}")]
    UnknownStep(String),

    /// An approval selected a variant the step did not produce.
    #[error("Step '{step_id}' has no variant '{variant}'")]
    UnknownVariant {
        /// The step id.
        step_id: String,
        /// The requested variant label.
        variant: String,
    },

    /// An active step has no registered executor.
    #[error("No executor registered for step '{0}'")]
    MissingExecutor(String),

    /// A re-execution was requested for a step whose retry budget is spent.
    #[error("Step '{step_id}' has no retries remaining ({attempts}/{max_retries} attempts used)")]
    RetriesExhausted {
        /// The step id.
        step_id: String,
        /// Attempts already made.
        attempts: u32,
        /// The step's retry budget.
        max_retries: u32,
    },

    /// A dependency's circuit breaker rejected the call.
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FitflowError {
    /// Creates an invalid-state error.
    #[must_use]
    pub fn invalid_state(operation: &'static str, status: PipelineStatus) -> Self {
        Self::InvalidState { operation, status }
    }

    /// Returns true if the error indicates a caller bug rather than a
    /// runtime condition.
    #[must_use]
    pub fn is_contract_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::UnknownStep(_)
                | Self::UnknownVariant { .. }
                | Self::MissingExecutor(_)
                | Self::RetriesExhausted { .. }
        )
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();

        match self {
            Self::InvalidState { operation, status } => {
                map.insert("type".to_string(), serde_json::json!("InvalidState"));
                map.insert("operation".to_string(), serde_json::json!(operation));
                map.insert("status".to_string(), serde_json::json!(status));
            }
            Self::UnknownStep(step_id) => {
                map.insert("type".to_string(), serde_json::json!("UnknownStep"));
                map.insert("step_id".to_string(), serde_json::json!(step_id));
            }
            Self::UnknownVariant { step_id, variant } => {
                map.insert("type".to_string(), serde_json::json!("UnknownVariant"));
                map.insert("step_id".to_string(), serde_json::json!(step_id));
                map.insert("variant".to_string(), serde_json::json!(variant));
            }
            Self::MissingExecutor(step_id) => {
                map.insert("type".to_string(), serde_json::json!("MissingExecutor"));
                map.insert("step_id".to_string(), serde_json::json!(step_id));
            }
            Self::RetriesExhausted { step_id, attempts, max_retries } => {
                map.insert("type".to_string(), serde_json::json!("RetriesExhausted"));
                map.insert("step_id".to_string(), serde_json::json!(step_id));
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                map.insert("max_retries".to_string(), serde_json::json!(max_retries));
            }
            Self::CircuitOpen(err) => {
                map.extend(err.to_dict());
            }
            Self::Configuration(_) => {
                map.insert("type".to_string(), serde_json::json!("Configuration"));
            }
            Self::Serialization(_) => {
                map.insert("type".to_string(), serde_json::json!("Serialization"));
            }
        }

        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

/// Error raised by a circuit breaker that is rejecting calls.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Circuit breaker '{breaker}' is open; retry after {}ms", retry_after.as_millis())]
pub struct CircuitOpenError {
    /// Name of the breaker (the dependency it guards).
    pub breaker: String,
    /// Remaining cooldown before the breaker will admit a trial call.
    pub retry_after: Duration,
}

impl CircuitOpenError {
    /// Creates a new circuit-open error.
    #[must_use]
    pub fn new(breaker: impl Into<String>, retry_after: Duration) -> Self {
        Self {
            breaker: breaker.into(),
            retry_after,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!("CircuitOpen"));
        map.insert("breaker".to_string(), serde_json::json!(self.breaker));
        map.insert(
            "retry_after_ms".to_string(),
            serde_json::json!(u64::try_from(self.retry_after.as_millis()).unwrap_or(u64::MAX)),
        );
        map
    }
}

/// Network failure sub-classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkErrorKind {
    /// Connection reset by peer.
    ConnectionReset,
    /// Connection refused.
    ConnectionRefused,
    /// Host or network unreachable.
    Unreachable,
    /// DNS resolution failed.
    DnsFailure,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::DnsFailure => write!(f, "dns failure"),
        }
    }
}

/// Failure of a single remote model invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport-level network failure.
    #[error("Network error ({kind}): {message}")]
    Network {
        /// What went wrong at the transport level.
        kind: NetworkErrorKind,
        /// Detail message.
        message: String,
    },

    /// The call did not complete in time.
    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout {
        /// How long the call ran before timing out.
        elapsed_ms: u64,
    },

    /// The service answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response message.
        message: String,
    },

    /// The dependency's circuit breaker is open.
    #[error("{0}")]
    CircuitOpen(#[from] CircuitOpenError),

    /// The call was abandoned because the run was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Creates a network error.
    #[must_use]
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    /// Creates an HTTP status error.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Default retry classification.
    ///
    /// Network failures, timeouts and HTTP 429/502/503/504 are transient.
    /// Circuit-open rejections and other 4xx responses are never retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Http { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::CircuitOpen(_) | Self::Cancelled | Self::Other(_) => false,
        }
    }

    /// Whether the error says something about the dependency's health.
    ///
    /// Transport failures, timeouts, 429 and 5xx responses count against a
    /// circuit breaker. Other 4xx responses reflect the request, and
    /// cancellation or a circuit-open rejection reflect the caller.
    #[must_use]
    pub fn trips_breaker(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::Other(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::CircuitOpen(_) | Self::Cancelled => false,
        }
    }

    /// Short machine-readable kind, used in step metadata.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::Http { .. } => "http",
            Self::CircuitOpen(_) => "circuit_open",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "other",
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::network(NetworkErrorKind::ConnectionReset, err.to_string())
            }
            ErrorKind::ConnectionRefused => {
                Self::network(NetworkErrorKind::ConnectionRefused, err.to_string())
            }
            ErrorKind::NotConnected | ErrorKind::AddrNotAvailable => {
                Self::network(NetworkErrorKind::Unreachable, err.to_string())
            }
            ErrorKind::TimedOut => Self::Timeout { elapsed_ms: 0 },
            _ => Self::Other(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for RemoteError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout { elapsed_ms: 0 }
    }
}
