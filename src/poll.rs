//! # Bounded Polling
//!
//! Cancellable helpers for API round-trips and fixed-interval poll loops.
//!
//! Cancellation always wins over a poll's own timeout: a cancelled token
//! unwinds with [`Error::Cancelled`] at the next API call or poll tick.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Run a single cluster call, aborting it when `cancel` fires
pub async fn guarded<F, T>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        result = call => result,
    }
}

/// Poll `check` every `interval` until it yields `Some`, the timeout passes or
/// the token is cancelled
///
/// The first check runs immediately. Errors from `check` end the loop.
pub async fn poll_until<F, Fut, T>(
    operation: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(value) = guarded(cancel, check()).await? {
            return Ok(value);
        }

        if Instant::now() >= deadline {
            return Err(Error::Timeout {
                operation: operation.to_string(),
                timeout,
            });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(interval) => {}
        }
    }
}
