//! rate_limiter.rs - Serialized, adaptively spaced access to one provider
//!
//! Every outbound call to a provider goes through that provider's limiter.
//! Callers queue on a fair (FIFO) async mutex which is held for the whole
//! slot: spacing delay, then the task itself under a hard deadline. The
//! limiter never reorders and never cancels queued work.

use log::{debug, warn};
use std::future::Future;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

use crate::config::{LimiterConfig, ProviderConfig};
use crate::error::ProviderError;

/// Counters describing what went through a limiter so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LimiterStats {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rate_limited: u64,
    pub timed_out: u64,
}

#[derive(Debug)]
struct AdaptiveState {
    current_interval: Duration,
    consecutive_failures: u32,
    pending_penalty: Option<Duration>,
    stats: LimiterStats,
}

/// One instance per external provider
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    base_interval: Duration,
    task_timeout: Duration,
    config: LimiterConfig,
    /// Timestamp of the last dispatch; the lock itself is the queue.
    queue: Mutex<Option<Instant>>,
    state: StdMutex<AdaptiveState>,
}

impl RateLimiter {
    pub fn new(
        name: &str,
        base_interval: Duration,
        task_timeout: Duration,
        config: LimiterConfig,
    ) -> Self {
        debug!(
            "Rate limiter for {}: interval {:?}, timeout {:?}, failure threshold {}",
            name, base_interval, task_timeout, config.failure_threshold
        );

        RateLimiter {
            name: name.to_string(),
            base_interval,
            task_timeout,
            config,
            queue: Mutex::new(None),
            state: StdMutex::new(AdaptiveState {
                current_interval: base_interval,
                consecutive_failures: 0,
                pending_penalty: None,
                stats: LimiterStats::default(),
            }),
        }
    }

    pub fn for_provider(provider: &ProviderConfig, config: &LimiterConfig) -> Self {
        Self::new(
            &provider.name,
            provider.min_interval,
            provider.request_timeout,
            config.clone(),
        )
    }

    /// Spacing that will be applied before the next dispatch
    pub fn current_interval(&self) -> Duration {
        self.lock_state().current_interval
    }

    pub fn stats(&self) -> LimiterStats {
        self.lock_state().stats.clone()
    }

    /// Wait for this provider's next slot, then run `task` under the deadline.
    ///
    /// A task that overruns the deadline is dropped and reported as
    /// `ProviderError::Timeout`; the queue moves on.
    pub async fn execute<T, F, Fut>(&self, task: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_dispatch = self.queue.lock().await;

        let (interval, penalty) = {
            let mut state = self.lock_state();
            (state.current_interval, state.pending_penalty.take())
        };

        let spacing = match *last_dispatch {
            Some(at) => interval.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        };
        let wait = spacing + penalty.unwrap_or(Duration::ZERO);

        if !wait.is_zero() {
            debug!("{}: waiting {:?} for next slot", self.name, wait);
            sleep(wait).await;
        }

        *last_dispatch = Some(Instant::now());

        let outcome = match timeout(self.task_timeout, task()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };

        self.record(&outcome);
        outcome
    }

    fn record<T>(&self, outcome: &Result<T, ProviderError>) {
        let mut state = self.lock_state();
        state.stats.dispatched += 1;

        match outcome {
            Ok(_) => {
                state.stats.succeeded += 1;
                state.consecutive_failures = state.consecutive_failures.saturating_sub(1);

                if state.consecutive_failures <= self.config.failure_threshold
                    && state.current_interval > self.base_interval
                {
                    state.current_interval = (state.current_interval / 2).max(self.base_interval);
                    debug!(
                        "{}: recovering, interval now {:?}",
                        self.name, state.current_interval
                    );
                }
            }
            Err(err) => {
                state.stats.failed += 1;
                state.consecutive_failures += 1;

                if matches!(err, ProviderError::Timeout) {
                    state.stats.timed_out += 1;
                }

                if err.is_rate_limited() {
                    state.stats.rate_limited += 1;
                    state.pending_penalty = Some(self.config.rate_limit_penalty);
                    warn!(
                        "{}: rate limited, next slot delayed by {:?}",
                        self.name, self.config.rate_limit_penalty
                    );
                }

                if state.consecutive_failures > self.config.failure_threshold {
                    let ceiling = self.config.max_interval.max(self.base_interval);
                    let doubled = (state.current_interval * 2).min(ceiling);
                    if doubled != state.current_interval {
                        warn!(
                            "{}: {} consecutive failures, interval {:?} -> {:?}",
                            self.name, state.consecutive_failures, state.current_interval, doubled
                        );
                    }
                    state.current_interval = doubled;
                }
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AdaptiveState> {
        // A poisoned lock only means a panic elsewhere mid-update; the counters stay usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
