//! Polling lock status until a condition holds

use crate::error::{LockError, LockResult};
use crate::lock::DistributedLock;
use crate::status::LockStatus;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Repeatedly read the lock status and hand it to `evaluate`.
///
/// Stops when `evaluate` returns `Break` or an error, sleeping `period`
/// between reads. Read failures are passed to `evaluate` rather than ending
/// the loop, so the caller decides whether they are fatal. There is no
/// built-in deadline; put one in `evaluate`.
pub async fn poll_until<L, F>(lock: &L, period: Duration, mut evaluate: F) -> LockResult<()>
where
    L: DistributedLock + ?Sized,
    F: FnMut(LockResult<LockStatus>) -> LockResult<ControlFlow<()>>,
{
    loop {
        let status = lock.get_lock_status().await;
        trace!(key = %lock.key(), status = ?status, "Polled lock status");

        if evaluate(status)?.is_break() {
            return Ok(());
        }

        tokio::time::sleep(period).await;
    }
}

/// Poll until `condition` holds for the lock status.
///
/// The first read error is returned as is. Once `deadline` passes without a
/// match the result is [`LockError::DeadlineExceeded`] for the lock's key.
pub async fn wait_for_status<L, C>(
    lock: &L,
    period: Duration,
    deadline: Instant,
    mut condition: C,
) -> LockResult<LockStatus>
where
    L: DistributedLock + ?Sized,
    C: FnMut(&LockStatus) -> bool,
{
    let mut last = LockStatus::default();

    poll_until(lock, period, |status| {
        let status = status?;
        last = status;

        if condition(&status) {
            Ok(ControlFlow::Break(()))
        } else if Instant::now() >= deadline {
            Err(LockError::DeadlineExceeded {
                key: lock.key().to_string(),
            })
        } else {
            Ok(ControlFlow::Continue(()))
        }
    })
    .await?;

    Ok(last)
}
