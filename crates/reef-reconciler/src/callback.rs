//! Callback delivery from the runner to the origin.
//!
//! The origin (the scheduling side) learns about runner lifecycle changes
//! through a [`CallbackHandler`]. Delivery may be unreliable; the status
//! updater wraps `notify` in its own retry policy.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state reported through a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackState {
    /// The runner is actively reconciling (heartbeat).
    Running,
    /// The reconciliation finished successfully (terminal).
    Success,
    /// One attempt failed; the runner is still retrying.
    Failed,
    /// All attempts are exhausted (terminal).
    Error,
}

impl CallbackState {
    /// Returns true if no further state will be reported after this one.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Returns a label suitable for logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for CallbackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Capability for reporting runner lifecycle changes to the origin.
#[async_trait]
pub trait CallbackHandler: Send + Sync {
    /// Reports one lifecycle state, with an optional reason on failures.
    ///
    /// A single delivery attempt; retry policy is the caller's concern.
    async fn notify(&self, state: CallbackState, reason: Option<&str>) -> Result<()>;
}

/// Callback handler that only logs; used when runner and scheduler share a
/// process and operation bookkeeping happens at the dispatch site.
#[derive(Debug, Default)]
pub struct LoggingCallbackHandler;

#[async_trait]
impl CallbackHandler for LoggingCallbackHandler {
    async fn notify(&self, state: CallbackState, reason: Option<&str>) -> Result<()> {
        match reason {
            Some(reason) => tracing::info!(state = %state, reason, "component status changed"),
            None => tracing::debug!(state = %state, "component status changed"),
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct CallbackBody<'a> {
    status: CallbackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

/// Callback handler that POSTs lifecycle changes to a remote origin.
#[derive(Debug, Clone)]
pub struct HttpCallbackHandler {
    client: reqwest::Client,
    url: String,
}

impl HttpCallbackHandler {
    /// Creates a handler targeting `url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::non_retriable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CallbackHandler for HttpCallbackHandler {
    async fn notify(&self, state: CallbackState, reason: Option<&str>) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&CallbackBody { status: state, reason })
            .send()
            .await
            .map_err(|e| Error::retriable(format!("callback request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(Error::retriable(format!(
                "callback rejected (status={status}): {body}"
            )))
        } else {
            Err(Error::non_retriable(format!(
                "callback rejected (status={status}): {body}"
            )))
        }
    }
}

#[cfg(test)]
pub(crate) use tests::RecordingCallbackHandler;
