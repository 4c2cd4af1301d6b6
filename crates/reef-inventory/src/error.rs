//! Error types for the cluster inventory.

use crate::status::ClusterStatusKind;

/// The result type used throughout reef-inventory.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in inventory operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No state exists for the requested cluster (and configuration version).
    #[error("cluster not found: {cluster}{}", config_version.map(|v| format!(" (configVersion: {v})")).unwrap_or_default())]
    NotFound {
        /// The cluster that was not found.
        cluster: String,
        /// The requested configuration version, if the lookup was versioned.
        config_version: Option<i64>,
    },

    /// A status update violated the cluster status state machine.
    #[error("invalid status transition for cluster '{cluster}': {from} -> {to}")]
    InvalidStatusTransition {
        /// The cluster whose status was being updated.
        cluster: String,
        /// The current status.
        from: ClusterStatusKind,
        /// The attempted target status.
        to: ClusterStatusKind,
    },

    /// A submitted cluster model failed validation.
    #[error("invalid cluster model: {message}")]
    InvalidInput {
        /// Description of the validation failure.
        message: String,
    },

    /// The underlying store failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },
}

impl Error {
    /// Creates a not-found error for an unversioned lookup.
    #[must_use]
    pub fn not_found(cluster: impl Into<String>) -> Self {
        Self::NotFound {
            cluster: cluster.into(),
            config_version: None,
        }
    }

    /// Creates a not-found error for a versioned lookup.
    #[must_use]
    pub fn config_not_found(cluster: impl Into<String>, config_version: i64) -> Self {
        Self::NotFound {
            cluster: cluster.into(),
            config_version: Some(config_version),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true if this error is a not-found.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
