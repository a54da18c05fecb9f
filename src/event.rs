//! Broadcast one-shot lifecycle events.
//!
//! Every process exposes two of these: *closing* (teardown has begun) and
//! *closed* (teardown has fully finished). An event transitions from
//! unfired to fired exactly once and, once fired, stays observable forever:
//! a waiter that shows up a minute later is released immediately, and any
//! number of waiters may be parked on the same event at once.
//!
//! The event is a thin wrapper over [`tokio_util::sync::CancellationToken`],
//! which already provides the atomic exactly-once transition and wakes an
//! unbounded set of waiters without per-wait allocation.

use tokio_util::sync::CancellationToken;

/// A broadcast one-shot event.
///
/// Obtained from [`Process::closing`](crate::Process::closing) and
/// [`Process::closed`](crate::Process::closed). Clones share the underlying
/// event; firing is observable through every clone.
///
/// # Example
/// ```no_run
/// # async fn demo() {
/// use proc_graph::Process;
///
/// let p = Process::new();
/// let closed = p.closed();
/// tokio::spawn(async move {
///     closed.wait().await;
///     println!("process fully closed");
/// });
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LifecycleEvent {
    token: CancellationToken,
}

impl LifecycleEvent {
    /// Creates a new, unfired event.
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Fires the event. Idempotent; only the first call transitions.
    pub(crate) fn fire(&self) {
        self.token.cancel();
    }

    /// Returns `true` once the event has fired.
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits until the event fires, returning immediately if it already has.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fire_is_idempotent() {
        let ev = LifecycleEvent::new();
        assert!(!ev.is_fired());
        ev.fire();
        ev.fire();
        assert!(ev.is_fired());
    }

    #[test]
    fn test_clones_share_state() {
        let ev = LifecycleEvent::new();
        let copy = ev.clone();
        ev.fire();
        assert!(copy.is_fired());
    }

    #[tokio::test]
    async fn test_wait_after_fire_returns_immediately() {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            let ev = LifecycleEvent::new();
            ev.fire();
            ev.wait().await;
        })
        .await;

        assert!(result.is_ok(), "Test timed out after 5 seconds");
    }

    #[tokio::test]
    async fn test_fire_releases_all_waiters() {
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            let ev = LifecycleEvent::new();
            let mut waiters = Vec::new();
            for _ in 0..32 {
                let observer = ev.clone();
                waiters.push(tokio::spawn(async move { observer.wait().await }));
            }

            // Give the waiters a moment to park before firing.
            tokio::time::sleep(Duration::from_millis(10)).await;
            ev.fire();

            for waiter in waiters {
                waiter.await.expect("waiter task panicked");
            }
        })
        .await;

        assert!(result.is_ok(), "Test timed out after 5 seconds");
    }
}
