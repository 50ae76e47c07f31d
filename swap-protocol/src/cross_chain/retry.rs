use std::future::Future;
use std::time::Duration;

use log::warn;
use tokio::sync::watch;

use crate::config::RetryPolicy;
use crate::error::{Result, SwapError};

/// Resolves once `abort` is raised. Never resolves if the sender is gone.
pub(crate) async fn aborted(abort: &mut watch::Receiver<bool>) {
    loop {
        if *abort.borrow_and_update() {
            return;
        }
        if abort.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleeps for `delay` unless the swap is aborted first.
pub(crate) async fn sleep_or_abort(delay: Duration, abort: &mut watch::Receiver<bool>) -> Result<()> {
    tokio::select! {
        _ = aborted(abort) => Err(SwapError::Aborted),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` is used up. Backs off exponentially in between.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    abort: &mut watch::Receiver<bool>,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        if *abort.borrow() {
            return Err(SwapError::Aborted);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{what}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_attempts
                );
                sleep_or_abort(delay, abort).await?;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
