//! Delayed and repeating tasks.
//!
//! Tasks run on the tokio runtime. Cancellation is cooperative: a cancelled
//! task never starts another run, but a run already in progress finishes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Shortest interval a repeating task may use.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// The task's identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Stop the task. Idempotent.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            trace!(task = %self.id, "Task cancelled");
            self.token.cancel();
        }
    }

    /// Whether the task was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the task has run to completion or been cancelled and exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

fn next_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

/// Run `task` once after `delay`.
pub fn schedule_once<F, Fut>(delay: Duration, task: F) -> TaskHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let id = next_id();
    let token = CancellationToken::new();
    let child = token.clone();
    let join = tokio::spawn(async move {
        tokio::select! {
            () = child.cancelled() => return,
            () = tokio::time::sleep(delay) => {},
        }
        if child.is_cancelled() {
            return;
        }
        trace!(task = %id, "Running delayed task");
        task().await;
    });
    TaskHandle { id, token, join }
}

/// Run `task` every `interval`, first immediately if `run_immediately`.
///
/// A run that overruns the interval delays the next one rather than
/// bunching runs together.
pub fn schedule_repeating<F, Fut>(interval: Duration, run_immediately: bool, mut task: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let id = next_id();
    let token = CancellationToken::new();
    let child = token.clone();
    let period = interval.max(MIN_INTERVAL);
    let join = tokio::spawn(async move {
        let now = Instant::now();
        let start = if run_immediately {
            now
        } else {
            now.checked_add(period).unwrap_or(now)
        };
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = child.cancelled() => return,
                _ = ticker.tick() => {},
            }
            if child.is_cancelled() {
                return;
            }
            trace!(task = %id, "Running repeating task");
            task().await;
        }
    });
    TaskHandle { id, token, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let read = Arc::clone(&count);
        (count, move || read.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let (count, read) = counter();
        let handle = schedule_once(Duration::from_secs(5), move || async move {
            count.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(read(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(read(), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_fire() {
        let (count, read) = counter();
        let handle = schedule_once(Duration::from_secs(5), move || async move {
            count.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(read(), 0);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_immediate() {
        let (count, read) = counter();
        let handle = schedule_repeating(Duration::from_secs(10), true, move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(read(), 1);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(read(), 2);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(read(), 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(read(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_delayed_start() {
        let (count, read) = counter();
        let _handle = schedule_repeating(Duration::from_secs(10), false, move || {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(read(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(read(), 1);
    }
}
