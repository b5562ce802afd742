//! Per-component task scheduler.
//!
//! Every timer or background task a component starts (heartbeat, reconnect
//! backoff, periodic sync) goes through its `Scheduler`, so teardown is a
//! single `cancel_all()` and nothing fires afterwards.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Owns a set of tokio tasks and cancels them together.
pub struct Scheduler {
    name: &'static str,
    token: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a new scheduler. `name` is used for logging only.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            token: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Token cancelled by the next `cancel_all()`.
    pub fn token(&self) -> CancellationToken {
        self.token.lock().child_token()
    }

    /// Spawn a task that is dropped at its next await point after `cancel_all()`.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = fut => {}
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Run `fut` once after `delay`.
    pub fn spawn_after<F>(&self, delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            fut.await;
        });
    }

    /// Run `tick` every `period`, first run after one period.
    pub fn spawn_interval<F, Fut>(&self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
    }

    /// Cancel every task started so far. Idempotent.
    ///
    /// Tasks spawned afterwards run under a fresh token.
    pub fn cancel_all(&self) {
        let old = {
            let mut token = self.token.lock();
            std::mem::replace(&mut *token, CancellationToken::new())
        };
        old.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let count = tasks.len();
        for handle in tasks {
            handle.abort();
        }
        debug!(scheduler = self.name, count, "Cancelled scheduled tasks");
    }

    /// Number of tasks still running.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.lock().cancel();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}
