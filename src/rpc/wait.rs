//! Polling condition waiter.
//!
//! Turns a repeatedly checked boolean into an awaitable with a bounded wait.
//! The peer itself resolves responses through `oneshot` channels; this
//! primitive serves callers that only have a flag to watch, such as waiting
//! for a socket to report closed.

use std::time::Duration;

use tokio::time::Instant;

/// Re-check `condition` every `poll_interval` until it holds or `timeout`
/// elapses.
///
/// Returns `true` as soon as `condition` returns `true`, and `false` once the
/// accumulated wait reaches `timeout` without it doing so. The condition is
/// always checked at least once, so a zero `timeout` still reports a
/// condition that already holds. A zero `poll_interval` yields to the
/// scheduler between checks instead of sleeping.
pub async fn wait_until<F>(mut condition: F, timeout: Duration, poll_interval: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;

    loop {
        if condition() {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }

        if poll_interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            let remaining = deadline.saturating_duration_since(now);
            tokio::time::sleep(poll_interval.min(remaining)).await;
        }
    }
}
