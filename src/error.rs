//! Error types for CA rotation operations.
//!
//! Defines a single error enum with classification helpers used by the retry
//! policy, the dual-trust-root client and the rotation passes.

use std::time::Duration;
use thiserror::Error;

/// Error type for rotation operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Cloud resource management error
    #[error("Cloud API error: {0}")]
    Cloud(String),

    /// Remote command execution failed
    #[error("Remote command failed on {host}: {message}")]
    Remote {
        host: String,
        output: String,
        message: String,
    },

    /// A polled condition did not hold
    #[error("Condition not met: {0}")]
    ConditionNotMet(String),

    /// A polled condition went from satisfied to unsatisfied too many times
    #[error(
        "condition flapping after {successes} successes and {flaps} flaps, crash loop suspected"
    )]
    Flapping {
        successes: u32,
        flaps: u32,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Polling gave up before the condition converged
    #[error("timed out after {timeout:?} waiting for the condition, condition successesCount: {successes}")]
    Timeout {
        timeout: Duration,
        successes: u32,
        #[source]
        source: Option<Box<Error>>,
    },

    /// Neither client produced a result before the deadline and no error was observed
    #[error("Timeout after {timeout:?}: {operation}")]
    RaceTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// A single attempt exceeded its own deadline
    #[error("Attempt exceeded deadline of {deadline:?}: {operation}")]
    AttemptTimeout {
        operation: &'static str,
        deadline: Duration,
    },

    /// The governing cancellation scope was cancelled
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Container id not in the `<runtime>://<id>` form of a supported runtime
    #[error("Unexpected container id: {0}")]
    InvalidContainerId(String),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error annotated with the intent of the failing operation
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Annotate this error with what was being attempted.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip context layers and return the underlying error.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self.root_cause(), Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_) | kube::Error::HyperError(_))
            }
            Error::Cloud(_) | Error::AttemptTimeout { .. } | Error::RaceTimeout { .. } => true,
            Error::Remote { .. } => true,
            Error::ConditionNotMet(_)
            | Error::Flapping { .. }
            | Error::Timeout { .. }
            | Error::Cancelled(_)
            | Error::InvalidContainerId(_)
            | Error::MissingField(_)
            | Error::Serialization(_) => false,
            Error::Context { .. } => false,
        }
    }
}

/// Result type alias for rotation operations
pub type Result<T> = std::result::Result<T, Error>;
