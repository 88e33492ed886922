// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Bounded Retry Policy
//!
//! A `RetryPolicy` runs an attempt function up to `max_attempts` times. The
//! first attempt starts immediately; every retry waits for the backoff delay
//! first. Waiting goes through a `Sleeper` so tests can observe the delays
//! without spending real time.

use crate::{context::PublishContext, errors::AmqpError};
use async_trait::async_trait;
use std::{future::Future, time::Duration};
use tracing::warn;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay applied before a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles from `initial` on each retry, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before attempt number `attempt` (1-based); always zero for the first one.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(attempt - 2);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    /// A policy always makes at least one attempt.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy::new(max_attempts, Backoff::Fixed(delay))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Runs `attempt` until it succeeds, fails with a non-retryable error, or
    /// the attempts are used up.
    ///
    /// Both the delay and the attempt itself are abandoned when `ctx` is done,
    /// in which case the context's interruption error is returned. Exhaustion
    /// yields `PublishRetriesExhausted` wrapping the last attempt's error.
    pub async fn run<T, F, Fut>(
        &self,
        ctx: &PublishContext,
        sleeper: &dyn Sleeper,
        mut attempt: F,
    ) -> Result<T, AmqpError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AmqpError>>,
    {
        let mut last_err = AmqpError::InternalError;

        for n in 1..=self.max_attempts {
            if ctx.is_done() {
                return Err(ctx.interruption());
            }

            let delay = self.backoff.delay_before(n);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = ctx.done() => return Err(ctx.interruption()),
                    _ = sleeper.sleep(delay) => {}
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = ctx.done() => return Err(ctx.interruption()),
                outcome = attempt(n) => outcome,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if n < self.max_attempts {
                        warn!(
                            attempt = n,
                            max_attempts = self.max_attempts,
                            error = err.to_string(),
                            "attempt failed, retrying"
                        );
                    }
                    last_err = err;
                }
            }
        }

        Err(AmqpError::PublishRetriesExhausted {
            attempts: self.max_attempts,
            source: Box::new(last_err),
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::fixed(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// `Sleeper` backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}


#[cfg(test)]
mod tests {
    use super::{testing::RecordingSleeper, *};
    use tokio_util::sync::CancellationToken;

    #[test]
    fn backoff_delays() {
        let fixed = Backoff::Fixed(Duration::from_secs(1));
        assert_eq!(fixed.delay_before(1), Duration::ZERO);
        assert_eq!(fixed.delay_before(3), Duration::from_secs(1));

        let exp = Backoff::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        assert_eq!(exp.delay_before(1), Duration::ZERO);
        assert_eq!(exp.delay_before(2), Duration::from_millis(100));
        assert_eq!(exp.delay_before(3), Duration::from_millis(200));
        assert_eq!(exp.delay_before(4), Duration::from_millis(350));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::fixed(0, DEFAULT_RETRY_DELAY).max_attempts(), 1);
    }

    #[tokio::test]
    async fn succeeds_on_last_attempt_after_two_delays() {
        let sleeper = RecordingSleeper::default();
        let mut calls = 0;

        let result = RetryPolicy::default()
            .run(&PublishContext::default(), &sleeper, |n| {
                calls += 1;
                async move {
                    if n < 3 {
                        Err(AmqpError::PublishingError("boom".to_owned()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
        assert_eq!(sleeper.delays(), vec![DEFAULT_RETRY_DELAY, DEFAULT_RETRY_DELAY]);
    }

    #[tokio::test]
    async fn exhaustion_wraps_the_last_error() {
        let sleeper = RecordingSleeper::default();

        let result: Result<(), AmqpError> = RetryPolicy::default()
            .run(&PublishContext::default(), &sleeper, |n| async move {
                Err(AmqpError::PublishingError(format!("attempt {}", n)))
            })
            .await;

        assert_eq!(
            result,
            Err(AmqpError::PublishRetriesExhausted {
                attempts: 3,
                source: Box::new(AmqpError::PublishingError("attempt 3".to_owned())),
            })
        );
    }

    #[tokio::test]
    async fn cancelled_context_stops_retrying() {
        let sleeper = RecordingSleeper::default();
        let token = CancellationToken::new();
        let ctx = PublishContext::default().with_cancellation(token.clone());
        let mut calls = 0;

        let result: Result<(), AmqpError> = RetryPolicy::default()
            .run(&ctx, &sleeper, |_| {
                calls += 1;
                token.cancel();
                async { Err(AmqpError::ChannelError) }
            })
            .await;

        assert_eq!(result, Err(AmqpError::Cancelled));
        assert_eq!(calls, 1);
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn cancellation_aborts_an_in_flight_attempt() {
        let token = CancellationToken::new();
        let ctx = PublishContext::default().with_cancellation(token.clone());
        let canceller = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result: Result<(), AmqpError> = RetryPolicy::default()
            .run(&ctx, &TokioSleeper, |_| async {
                std::future::pending::<()>().await;
                Ok(())
            })
            .await;

        assert_eq!(result, Err(AmqpError::Cancelled));
    }

    #[tokio::test]
    async fn deadline_interrupts_the_retry_delay() {
        let ctx = PublishContext::default().with_timeout(Duration::from_millis(20));
        let policy = RetryPolicy::fixed(3, Duration::from_secs(60));

        let result: Result<(), AmqpError> = policy
            .run(&ctx, &TokioSleeper, |_| async { Err(AmqpError::ChannelError) })
            .await;

        assert_eq!(result, Err(AmqpError::DeadlineExceeded));
    }
}
