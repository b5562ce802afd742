//! Concurrent GET deduplication.
//!
//! Identical in-flight calls share one underlying future. Once it resolves
//! successfully, the result stays available to identical calls for a short
//! window. When every waiter of an in-flight call has gone away (dropped or
//! cancelled), the shared future is dropped, aborting the underlying call.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;
use tradelink_core::ApiResult;

type SharedCall = Shared<BoxFuture<'static, ApiResult>>;

struct InFlight {
    future: SharedCall,
    waiters: usize,
    generation: u64,
}

struct Completed {
    result: ApiResult,
    completed_at: Instant,
}

#[derive(Default)]
struct State {
    inflight: HashMap<String, InFlight>,
    completed: HashMap<String, Completed>,
    next_generation: u64,
}

pub struct RequestDeduplicator {
    window: Duration,
    state: Mutex<State>,
}

impl RequestDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(State::default()),
        }
    }

    /// Run `make()` unless an identical call is in flight or recently done.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> ApiResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ApiResult> + Send + 'static,
    {
        let (future, generation) = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let window = self.window;
            state
                .completed
                .retain(|_, c| now.duration_since(c.completed_at) < window);

            if let Some(done) = state.completed.get(key) {
                trace!(key, "Dedup hit (completed)");
                return done.result.clone();
            }

            if let Some(entry) = state.inflight.get_mut(key) {
                trace!(key, waiters = entry.waiters + 1, "Dedup hit (in flight)");
                entry.waiters += 1;
                (entry.future.clone(), entry.generation)
            } else {
                let generation = state.next_generation;
                state.next_generation += 1;
                let future = make().boxed().shared();
                state.inflight.insert(
                    key.to_string(),
                    InFlight {
                        future: future.clone(),
                        waiters: 1,
                        generation,
                    },
                );
                (future, generation)
            }
        };

        let mut guard = WaiterGuard {
            dedup: self,
            key,
            generation,
            finished: false,
        };
        let result = future.await;
        guard.finish(&result);
        result
    }

    /// Calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.state.lock().inflight.len()
    }

    /// Drop every entry. In-flight calls with no remaining waiters are aborted.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.inflight.clear();
        state.completed.clear();
    }
}

/// Tracks one waiter so a dropped caller releases its share.
struct WaiterGuard<'a> {
    dedup: &'a RequestDeduplicator,
    key: &'a str,
    generation: u64,
    finished: bool,
}

impl WaiterGuard<'_> {
    fn finish(&mut self, result: &ApiResult) {
        self.finished = true;
        let mut state = self.dedup.state.lock();
        let current = state
            .inflight
            .get(self.key)
            .is_some_and(|e| e.generation == self.generation);
        if current {
            state.inflight.remove(self.key);
            if result.is_ok() && !self.dedup.window.is_zero() {
                state.completed.insert(
                    self.key.to_string(),
                    Completed {
                        result: result.clone(),
                        completed_at: Instant::now(),
                    },
                );
            }
        }
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.dedup.state.lock();
        let abandoned = match state.inflight.get_mut(self.key) {
            Some(entry) if entry.generation == self.generation => {
                entry.waiters = entry.waiters.saturating_sub(1);
                entry.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            trace!(key = self.key, "All waiters gone, aborting shared call");
            state.inflight.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tradelink_core::ApiError;

    fn counted_call(
        calls: &Arc<AtomicU32>,
        delay: Duration,
        result: ApiResult,
    ) -> impl Future<Output = ApiResult> + Send + 'static {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            result
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_share_one_execution() {
        let dedup = RequestDeduplicator::new(Duration::from_secs(2));
        let calls = Arc::new(AtomicU32::new(0));

        let (a, b) = tokio::join!(
            dedup.run("GET:/test:", || counted_call(
                &calls,
                Duration::from_millis(50),
                Ok(json!({"n": 1}))
            )),
            dedup.run("GET:/test:", || counted_call(
                &calls,
                Duration::from_millis(50),
                Ok(json!({"n": 2}))
            )),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), json!({"n": 1}));
        assert_eq!(b.unwrap(), json!({"n": 1}));
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_result_expires_after_window() {
        let dedup = RequestDeduplicator::new(Duration::from_secs(2));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            dedup
                .run("k", || counted_call(&calls, Duration::ZERO, Ok(json!(1))))
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        dedup
            .run("k", || counted_call(&calls, Duration::ZERO, Ok(json!(1))))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_not_cached() {
        let dedup = RequestDeduplicator::new(Duration::from_secs(2));
        let calls = Arc::new(AtomicU32::new(0));

        let first = dedup
            .run("k", || {
                counted_call(&calls, Duration::ZERO, Err(ApiError::network("down")))
            })
            .await;
        assert!(first.is_err());

        let second = dedup
            .run("k", || counted_call(&calls, Duration::ZERO, Ok(json!(1))))
            .await;
        assert!(second.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_waiter_dropped_aborts_call() {
        let dedup = RequestDeduplicator::new(Duration::from_secs(2));
        let calls = Arc::new(AtomicU32::new(0));
        let finished = Arc::new(AtomicU32::new(0));

        let f = finished.clone();
        let call = {
            let calls = calls.clone();
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                f.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ApiError>(json!(1))
            }
        };

        let timed_out =
            tokio::time::timeout(Duration::from_millis(100), dedup.run("k", call)).await;
        assert!(timed_out.is_err());
        assert_eq!(dedup.in_flight(), 0);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }
}
