//! Error types for the component reconciler.
//!
//! Errors carry their retry classification: the runner's retry loop
//! re-enters only on [`Error::Retriable`], and the scheduler uses the same
//! discrimination to decide between `clientError` and `error`.

/// The result type used throughout reef-reconciler.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while reconciling one component.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transient failure (I/O, deploy, progress timeout); worth retrying.
    #[error("retriable reconciliation failure: {message}")]
    Retriable {
        /// Description of the failure.
        message: String,
    },

    /// Permanent failure (configuration, chart) that retrying cannot fix.
    #[error("non-retriable reconciliation failure: {message}")]
    NonRetriable {
        /// Description of the failure.
        message: String,
    },

    /// Callback delivery kept failing; the origin is unreachable.
    #[error("callback delivery failed after {attempts} attempts: {message}")]
    Callback {
        /// Number of delivery attempts made.
        attempts: u32,
        /// Description of the last failure.
        message: String,
    },

    /// The surrounding context was cancelled; clean shutdown, not a failure.
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl Error {
    /// Creates a retriable error.
    #[must_use]
    pub fn retriable(message: impl Into<String>) -> Self {
        Self::Retriable {
            message: message.into(),
        }
    }

    /// Creates a non-retriable error.
    #[must_use]
    pub fn non_retriable(message: impl Into<String>) -> Self {
        Self::NonRetriable {
            message: message.into(),
        }
    }

    /// Returns true if another attempt could succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable { .. })
    }

    /// Returns true if the error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
