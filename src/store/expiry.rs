//! Expiry timers for correlation entries.
//!
//! Correlation TTLs are configurable and may exceed what a 32-bit
//! millisecond timer can express (about 24.8 days). `LongTimer` splits a
//! long wait into steps no longer than [`MAX_TIMER_STEP`] and counts the
//! remaining duration down between them.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Longest single wait: `i32::MAX` milliseconds.
pub const MAX_TIMER_STEP: Duration = Duration::from_millis(i32::MAX as u64);

/// A wait of arbitrary length built from bounded steps.
#[derive(Debug, Clone)]
pub struct LongTimer {
    remaining: Duration,
    step: Duration,
}

impl LongTimer {
    pub fn new(duration: Duration) -> Self {
        Self::with_step(duration, MAX_TIMER_STEP)
    }

    /// Timer with a custom step size. A zero step is replaced by the default.
    pub fn with_step(duration: Duration, step: Duration) -> Self {
        let step = if step.is_zero() { MAX_TIMER_STEP } else { step };
        Self {
            remaining: duration,
            step,
        }
    }

    /// Time left before the timer fires.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// Take the next bounded wait, or `None` once nothing remains.
    pub fn next_wait(&mut self) -> Option<Duration> {
        if self.remaining.is_zero() {
            return None;
        }
        let wait = self.remaining.min(self.step);
        self.remaining -= wait;
        Some(wait)
    }

    /// Sleep through every step.
    pub async fn wait(mut self) {
        while let Some(wait) = self.next_wait() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Run `on_expiry` once `after` has elapsed.
pub fn schedule_expiry<F>(after: Duration, on_expiry: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        LongTimer::new(after).wait().await;
        on_expiry.await;
    })
}
