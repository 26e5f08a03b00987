// Cancellable timer service
// Delayed and periodic tasks tied to a root cancellation token

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
use tracing::debug;

/// Handle to one scheduled timer
#[derive(Debug, Clone)]
pub struct TimerHandle {
    name: &'static str,
    token: CancellationToken,
}

impl TimerHandle {
    /// Stop the timer. A callback already running finishes its current await.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("Cancelling timer '{}'", self.name);
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Spawns timers whose lifetime is bounded by the service's root token.
///
/// Cancelling the service cancels every timer it ever scheduled.
#[derive(Debug, Clone, Default)]
pub struct TimerService {
    root: CancellationToken,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` once after `delay` unless cancelled first
    pub fn after<F>(&self, name: &'static str, delay: Duration, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let cancel = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // The callback itself can still be cut short
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = task => {}
                    }
                }
            }
        });

        TimerHandle { name, token }
    }

    /// Run `tick` every `period`, first after one full period.
    /// Ticks never overlap; a slow tick delays the next one.
    pub fn every<F, Fut>(&self, name: &'static str, period: Duration, mut tick: F) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.root.child_token();
        let cancel = token.clone();

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tick() => {}
                        }
                    }
                }
            }
        });

        TimerHandle { name, token }
    }

    /// Spawn an untimed task that still stops when the service is cancelled
    pub fn spawn<F>(&self, name: &'static str, task: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.after(name, Duration::ZERO, task)
    }

    /// Cancel every timer
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Resolves once the service is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.root.cancelled()
    }

    /// Guard that cancels the service when dropped
    pub fn drop_guard(&self) -> DropGuard {
        self.root.clone().drop_guard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_after_fires_once() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        timers.after("once", Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_after_never_fires() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let handle = timers.after("cancelled", Duration::from_millis(100), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.cancel();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_skips_immediate_tick_and_repeats() {
        let timers = TimerService::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        let handle = timers.every("tick", Duration::from_secs(30), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_runs_now_and_stops_with_service() {
        let timers = TimerService::new();
        let steps = Arc::new(AtomicUsize::new(0));

        let counter = steps.clone();
        timers.spawn("task", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);

        timers.cancel_all();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(steps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_every_timer() {
        let timers = TimerService::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let a = fired.clone();
        let first = timers.after("a", Duration::from_secs(1), async move {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = fired.clone();
        let second = timers.every("b", Duration::from_secs(1), move || {
            let b = b.clone();
            async move {
                b.fetch_add(1, Ordering::SeqCst);
            }
        });

        timers.cancel_all();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(first.is_cancelled() && second.is_cancelled());
        assert!(timers.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_guard_cancels_service() {
        let timers = TimerService::new();
        let guard = timers.drop_guard();
        assert!(!timers.is_cancelled());

        drop(guard);
        assert!(timers.is_cancelled());
        timers.cancelled().await;
    }
}
