//! Retry policy and backoff

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::models::{Marker, MarkerKind, TestItem};

/// Seconds as a `Duration`, or `None` when negative, NaN or too large to
/// represent
pub fn duration_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Growth of the pause between attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay multiplied by `factor` per retry, capped at `max_delay_secs`
    Exponential { factor: f64, max_delay_secs: f64 },
}

impl Backoff {
    /// Pause before retry number `retry` (1 for the first retry)
    pub fn delay(&self, base: Duration, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed => base,
            Backoff::Exponential {
                factor,
                max_delay_secs,
            } => {
                let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = base.as_secs_f64() * factor.powi(exponent);
                let capped = secs.min(max_delay_secs);
                if capped.is_nan() || capped <= 0.0 {
                    Duration::ZERO
                } else {
                    duration_from_secs(capped).unwrap_or(Duration::MAX)
                }
            }
        }
    }
}

/// Session-wide retry settings
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: Backoff,
    /// Retry every item, not only those marked `retry` or `flaky`
    pub retry_all: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            backoff: Backoff::Fixed,
            retry_all: false,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retry_all(mut self, retry_all: bool) -> Self {
        self.retry_all = retry_all;
        self
    }

    /// Retry plan for one item.
    ///
    /// The closest `retry` marker may override the budget and delay with
    /// its `max_retries` and `delay` keywords.
    pub fn plan_for(&self, item: &TestItem) -> RetryPlan {
        let marked = item.has_marker(MarkerKind::Retry.name())
            || item.has_marker(MarkerKind::Flaky.name());
        self.plan_with(marked, item.closest_marker(MarkerKind::Retry.name()))
    }

    /// Retry plan from an explicit marker lookup
    pub fn plan_with(&self, marked: bool, retry_marker: Option<&Marker>) -> RetryPlan {
        if !marked && !self.retry_all {
            return RetryPlan::single();
        }

        let mut plan = RetryPlan {
            enabled: true,
            max_retries: self.max_retries,
            delay: self.retry_delay,
            backoff: self.backoff,
        };
        if let Some(marker) = retry_marker {
            if let Some(max) = marker.kwarg_u64("max_retries") {
                plan.max_retries = u32::try_from(max).unwrap_or(u32::MAX);
            }
            if let Some(delay) = marker.kwarg_f64("delay") {
                match duration_from_secs(delay) {
                    Some(delay) => plan.delay = delay,
                    None => warn!("Ignoring retry delay {delay}, keeping {:?}", plan.delay),
                }
            }
        }
        plan
    }
}

/// Retry decision for one item
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPlan {
    pub enabled: bool,
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPlan {
    /// Exactly one attempt
    pub fn single() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Pause before `attempt` (attempt 1 is the first retry)
    pub fn delay_before(&self, attempt: u32) -> Duration {
        self.backoff.delay(self.delay, attempt)
    }
}

/// Sleep for `delay` unless cancelled first; returns `false` on cancellation
pub async fn sleep_with_cancellation(delay: Duration, token: &CancellationToken) -> bool {
    if token.is_cancelled() {
        return false;
    }
    if delay.is_zero() {
        yield_now().await;
        return true;
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = sleep(delay) => true,
    }
}
