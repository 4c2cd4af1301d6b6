//! Lifecycle status reporting for one runner execution.
//!
//! The status updater is a pull-plus-push hybrid: it owns a heartbeat
//! ticker that pushes `running` at a fixed interval while the runner is
//! active, and the runner signals attempt failures and terminal states
//! through the same callback. Callback delivery gets its own bounded retry;
//! on exhaustion the runner sees an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use reef_core::retry::{retry, Attempt, RetryError};

use crate::callback::{CallbackHandler, CallbackState};
use crate::error::{Error, Result};

/// Status updater tuning knobs.
#[derive(Debug, Clone)]
pub struct StatusUpdaterConfig {
    /// Interval between `running` heartbeats.
    pub interval: Duration,
    /// Delivery attempts per notification.
    pub max_retries: u32,
    /// Delay between delivery attempts.
    pub retry_delay: Duration,
}

impl Default for StatusUpdaterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_retries: 5,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Reports runner lifecycle changes to the origin.
///
/// State machine: `running` is emitted periodically while the runner is
/// active, `failed` signals one failed attempt (still retrying), `success`
/// and `error` are terminal and stop the heartbeat.
pub struct StatusUpdater {
    callback: Arc<dyn CallbackHandler>,
    config: StatusUpdaterConfig,
    state: watch::Sender<CallbackState>,
    started: Arc<AtomicBool>,
    cancel: CancellationToken,
    heartbeat_cancel: CancellationToken,
}

impl StatusUpdater {
    /// Creates an updater and starts its heartbeat task.
    ///
    /// The heartbeat stops when a terminal state is reported, when the
    /// updater is dropped, or when `parent` is cancelled.
    #[must_use]
    pub fn new(
        callback: Arc<dyn CallbackHandler>,
        config: StatusUpdaterConfig,
        parent: &CancellationToken,
    ) -> Self {
        let (state, state_rx) = watch::channel(CallbackState::Running);
        let started = Arc::new(AtomicBool::new(false));
        let heartbeat_cancel = parent.child_token();

        let heartbeat = Heartbeat {
            callback: callback.clone(),
            interval: config.interval,
            state: state_rx,
            started: started.clone(),
            cancel: heartbeat_cancel.clone(),
        };
        tokio::spawn(heartbeat.run());

        Self {
            callback,
            config,
            state,
            started,
            cancel: parent.child_token(),
            heartbeat_cancel,
        }
    }

    /// Returns the most recently reported state.
    #[must_use]
    pub fn current(&self) -> CallbackState {
        *self.state.borrow()
    }

    /// Reports that the runner is (still) actively reconciling.
    ///
    /// # Errors
    ///
    /// Fails when delivery keeps failing or a terminal state was already
    /// reported.
    pub async fn running(&self) -> Result<()> {
        self.ensure_not_terminal()?;
        self.started.store(true, Ordering::Relaxed);
        self.state.send_replace(CallbackState::Running);
        self.notify_with_retry(CallbackState::Running, None).await
    }

    /// Reports a failed attempt; the runner keeps retrying.
    ///
    /// # Errors
    ///
    /// Fails when delivery keeps failing or a terminal state was already
    /// reported.
    pub async fn failed(&self, reason: Option<&str>) -> Result<()> {
        self.ensure_not_terminal()?;
        self.state.send_replace(CallbackState::Failed);
        self.notify_with_retry(CallbackState::Failed, reason).await
    }

    /// Reports overall success and stops the heartbeat (terminal).
    ///
    /// # Errors
    ///
    /// Fails when delivery keeps failing or a terminal state was already
    /// reported.
    pub async fn success(&self) -> Result<()> {
        self.ensure_not_terminal()?;
        self.state.send_replace(CallbackState::Success);
        self.heartbeat_cancel.cancel();
        self.notify_with_retry(CallbackState::Success, None).await
    }

    /// Reports overall failure and stops the heartbeat (terminal).
    ///
    /// # Errors
    ///
    /// Fails when delivery keeps failing or a terminal state was already
    /// reported.
    pub async fn error(&self, reason: Option<&str>) -> Result<()> {
        self.ensure_not_terminal()?;
        self.state.send_replace(CallbackState::Error);
        self.heartbeat_cancel.cancel();
        self.notify_with_retry(CallbackState::Error, reason).await
    }

    fn ensure_not_terminal(&self) -> Result<()> {
        let current = *self.state.borrow();
        if current.is_terminal() {
            return Err(Error::non_retriable(format!(
                "status updater already reported terminal state '{current}'"
            )));
        }
        Ok(())
    }

    async fn notify_with_retry(&self, state: CallbackState, reason: Option<&str>) -> Result<()> {
        let attempts = self.config.max_retries.max(1);
        let outcome = retry(attempts, self.config.retry_delay, &self.cancel, |attempt| {
            let callback = self.callback.clone();
            async move {
                match callback.notify(state, reason).await {
                    Ok(()) => Attempt::Done(()),
                    Err(err) if err.is_retriable() => {
                        tracing::warn!(
                            state = %state,
                            attempt,
                            error = %err,
                            "callback delivery failed, retrying"
                        );
                        Attempt::Retry(err)
                    }
                    Err(err) => Attempt::Abort(err),
                }
            }
        })
        .await;

        match outcome {
            Ok(()) => Ok(()),
            Err(RetryError::Cancelled) => Err(Error::Cancelled),
            Err(RetryError::Aborted(err)) => Err(err),
            Err(RetryError::Exhausted(err)) => Err(Error::Callback {
                attempts,
                message: err.to_string(),
            }),
        }
    }
}

impl Drop for StatusUpdater {
    fn drop(&mut self) {
        self.heartbeat_cancel.cancel();
    }
}

struct Heartbeat {
    callback: Arc<dyn CallbackHandler>,
    interval: Duration,
    state: watch::Receiver<CallbackState>,
    started: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Heartbeat {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let active = self.started.load(Ordering::Relaxed)
                        && *self.state.borrow() == CallbackState::Running;
                    if !active {
                        continue;
                    }
                    if let Err(err) = self.callback.notify(CallbackState::Running, None).await {
                        tracing::warn!(error = %err, "heartbeat delivery failed");
                    }
                }
            }
        }
    }
}
