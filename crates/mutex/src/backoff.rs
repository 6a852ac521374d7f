// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 Shahzad A. Bhatti <bhatti@plexobject.com>
//
// This file is part of ddbsync.
//
// ddbsync is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// ddbsync is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with ddbsync. If not, see <https://www.gnu.org/licenses/>.

//! Backoff and transport retry policies.
//!
//! ## Backoff
//! `delay(n) = min(initial * multiplier^n, max)`, then equal jitter: the
//! actual sleep is uniform in `[delay/2, delay]`. Contending waiters spread
//! out, and nobody sleeps less than half the base delay.
//!
//! ## Retry
//! Only transport faults are retried, at most `max_attempts` tries in total.

use crate::{MutexError, MutexResult};
use ddbsync_store::StoreResult;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Smallest accepted first delay; anything shorter polls the store flat out.
pub const MIN_INITIAL_DELAY: Duration = Duration::from_millis(1);

/// Exponential backoff with equal jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// First delay
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay before retry number `attempt` (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(64) as i32);
        let nanos = self.initial_delay.as_nanos() as f64 * factor;
        let capped = nanos.min(self.max_delay.as_nanos() as f64);
        Duration::from_nanos(capped as u64).min(self.max_delay)
    }

    /// Jittered delay in `[base/2, base]`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let half = base / 2;
        let spread = u64::try_from((base - half).as_nanos()).unwrap_or(u64::MAX);
        if spread == 0 {
            return base;
        }
        half + Duration::from_nanos(rand::thread_rng().gen_range(0..=spread))
    }

    pub(crate) fn validate(&self) -> MutexResult<()> {
        if self.initial_delay < MIN_INITIAL_DELAY {
            return Err(MutexError::Config(format!(
                "backoff initial delay must be >= {:?}, got {:?}",
                MIN_INITIAL_DELAY, self.initial_delay
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(MutexError::Config(format!(
                "backoff max delay {:?} is below initial delay {:?}",
                self.max_delay, self.initial_delay
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(MutexError::Config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// Bounded retry for release, prune and lookup calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, including the first
    pub max_attempts: u32,
    /// Delay between tries
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy {
                initial_delay: Duration::from_millis(25),
                max_delay: Duration::from_millis(500),
                multiplier: 2.0,
            },
        }
    }
}

impl RetryPolicy {
    /// One try, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> MutexResult<()> {
        if self.max_attempts == 0 {
            return Err(MutexError::Config("retry max_attempts must be >= 1".to_string()));
        }
        self.backoff.validate()
    }

    /// Run `op` until it succeeds, fails with a non-transport error, or the
    /// attempt budget is spent.
    pub(crate) async fn run<T, F, Fut>(&self, operation: &'static str, key: &str, mut op: F) -> MutexResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transport() && attempt < max_attempts => {
                    let delay = self.backoff.delay(attempt - 1);
                    warn!(
                        lock_key = %key,
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transport error, retrying"
                    );
                    metrics::counter!(
                        "ddbsync_mutex_transport_retries_total",
                        "operation" => operation
                    )
                    .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(MutexError::from_store(operation, attempt, e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddbsync_store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_base_delay_grows_and_caps() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base_delay(0), Duration::from_millis(50));
        assert_eq!(policy.base_delay(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay(10), Duration::from_secs(2));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..8 {
            let base = policy.base_delay(attempt);
            for _ in 0..50 {
                let d = policy.delay(attempt);
                assert!(d >= base / 2, "{:?} below half of {:?}", d, base);
                assert!(d <= base, "{:?} above {:?}", d, base);
            }
        }
    }

    #[test]
    fn test_sub_millisecond_delays_still_grow() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_micros(500),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        };
        assert_eq!(policy.base_delay(0), Duration::from_micros(500));
        assert_eq!(policy.base_delay(1), Duration::from_millis(1));
        assert_eq!(policy.base_delay(20), Duration::from_millis(100));
        for attempt in 0..5 {
            assert!(policy.delay(attempt) >= Duration::from_micros(250));
        }
    }

    #[test]
    fn test_initial_delay_lower_bound() {
        let too_short = BackoffPolicy {
            initial_delay: Duration::from_micros(500),
            ..BackoffPolicy::default()
        };
        assert!(matches!(too_short.validate(), Err(MutexError::Config(_))));

        let at_bound = BackoffPolicy {
            initial_delay: MIN_INITIAL_DELAY,
            ..BackoffPolicy::default()
        };
        assert!(at_bound.validate().is_ok());

        let retry = RetryPolicy {
            max_attempts: 3,
            backoff: too_short,
        };
        assert!(retry.validate().is_err());
    }

    #[test]
    fn test_policy_validation() {
        assert!(BackoffPolicy::default().validate().is_ok());
        assert!(RetryPolicy::default().validate().is_ok());

        let zero = BackoffPolicy {
            initial_delay: Duration::ZERO,
            ..BackoffPolicy::default()
        };
        assert!(zero.validate().is_err());

        let inverted = BackoffPolicy {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        };
        assert!(inverted.validate().is_err());

        let shrinking = BackoffPolicy {
            multiplier: 0.5,
            ..BackoffPolicy::default()
        };
        assert!(shrinking.validate().is_err());

        let no_attempts = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(matches!(no_attempts.validate(), Err(MutexError::Config(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_from_transient_fault() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = RetryPolicy::default()
            .run("get", "job-42", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StoreError::Transport("reset".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_is_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: MutexResult<()> = RetryPolicy::default()
            .run("delete", "job-42", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Transport("down".to_string()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(MutexError::Transport { operation, attempts, .. }) => {
                assert_eq!(operation, "delete");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transport_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: MutexResult<()> = RetryPolicy::default()
            .run("get", "job-42", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Deserialization("garbage".to_string()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(MutexError::Deserialization(_))));
    }
}
