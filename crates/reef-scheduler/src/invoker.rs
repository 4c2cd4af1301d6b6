//! The seam between the scheduler and the component runner.

use async_trait::async_trait;

use crate::operation::Operation;

/// Failure of one component invocation, classified for retry decisions.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// Transient failure; the operation is re-queued as `clientError` until
    /// the retry budget is exhausted.
    #[error("retriable invocation failure: {message}")]
    Retriable {
        /// Description of the failure.
        message: String,
    },

    /// Permanent failure; the operation moves straight to `error`.
    #[error("non-retriable invocation failure: {message}")]
    NonRetriable {
        /// Description of the failure.
        message: String,
    },
}

impl InvokeError {
    /// Creates a retriable invocation error.
    #[must_use]
    pub fn retriable(message: impl Into<String>) -> Self {
        Self::Retriable {
            message: message.into(),
        }
    }

    /// Creates a non-retriable invocation error.
    #[must_use]
    pub fn non_retriable(message: impl Into<String>) -> Self {
        Self::NonRetriable {
            message: message.into(),
        }
    }

    /// Returns true if the failure is worth another attempt.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Retriable { .. })
    }
}

/// Drives one claimed operation to completion.
///
/// Implementations run the component installation (or delegate it to a
/// remote worker) and report the outcome; the scheduler owns all operation
/// state bookkeeping.
#[async_trait]
pub trait ComponentInvoker: Send + Sync {
    /// Executes the component operation.
    async fn invoke(&self, operation: &Operation) -> std::result::Result<(), InvokeError>;
}
