//! Cancellable one-shot timeout.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use overseer_events::{TaskHandle, schedule_once};

/// A deadline that runs an action once if it isn't cancelled first.
///
/// The action runs at most once. Cancelling is idempotent and a no-op after
/// the action started. Dropping the guard cancels it.
#[derive(Debug)]
pub struct TimeoutGuard {
    task: TaskHandle,
    fired: Arc<AtomicBool>,
}

impl TimeoutGuard {
    /// Arm a guard that runs `on_expire` after `timeout`.
    pub fn arm<F, Fut>(timeout: Duration, on_expire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let task = schedule_once(timeout, move || async move {
            if flag.swap(true, Ordering::SeqCst) {
                return;
            }
            on_expire().await;
        });
        Self { task, fired }
    }

    /// Disarm the guard. Returns `true` if this call stopped the action.
    pub fn cancel(&self) -> bool {
        let was_pending = !self.has_fired() && !self.task.is_cancelled();
        self.task.cancel();
        was_pending
    }

    /// Whether the action has started.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Whether the guard can still fire.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        !self.has_fired() && !self.task.is_cancelled()
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.task.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_guard(timeout: Duration) -> (TimeoutGuard, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        let guard = TimeoutGuard::arm(timeout, move || async move {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        (guard, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_timeout() {
        let (guard, count) = counting_guard(Duration::from_secs(60));
        assert!(guard.is_armed());
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(guard.has_fired());
        assert!(!guard.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (guard, count) = counting_guard(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(guard.cancel());
        assert!(!guard.cancel());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!guard.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (guard, count) = counting_guard(Duration::from_secs(5));
        drop(guard);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
