//! Cancellation-aware retry for long-running workers.
//!
//! The reconciler retries whole installation attempts; the status updater
//! retries callback deliveries. Both need the same capability: a bounded
//! number of attempts with a fixed delay, aborting immediately on
//! cancellation, and re-entering the loop only when the caller classifies
//! the failure as worth retrying.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Classified outcome of one attempt.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// The attempt succeeded; retrying stops.
    Done(T),
    /// The attempt failed transiently; retry after the delay.
    Retry(E),
    /// The attempt failed permanently; retrying stops immediately.
    Abort(E),
}

/// Why a retried computation did not produce a value.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The cancellation token fired before or between attempts.
    Cancelled,
    /// An attempt reported a permanent failure.
    Aborted(E),
    /// Every attempt reported a transient failure.
    Exhausted(E),
}

impl<E> RetryError<E> {
    /// Returns the underlying error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Aborted(e) | Self::Exhausted(e) => Some(e),
        }
    }
}

/// Runs `body` up to `attempts` times with `delay` between attempts.
///
/// The body receives the 1-indexed attempt number and classifies its own
/// outcome. Cancellation is checked before every attempt and while sleeping
/// between attempts; a fired token aborts with [`RetryError::Cancelled`]
/// without running the body again.
///
/// # Errors
///
/// Returns [`RetryError::Aborted`] for a permanent failure,
/// [`RetryError::Exhausted`] when the last allowed attempt failed
/// transiently, and [`RetryError::Cancelled`] on cancellation.
pub async fn retry<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    cancel: &CancellationToken,
    mut body: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match body(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(err) => return Err(RetryError::Aborted(err)),
            Attempt::Retry(err) => {
                if attempt >= attempts {
                    return Err(RetryError::Exhausted(err));
                }
                attempt += 1;
                tokio::select! {
                    () = cancel.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
