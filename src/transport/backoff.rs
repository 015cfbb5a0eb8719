//! Reconnect backoff.
//!
//! [`BackoffState`] is the pure delay arithmetic. [`Backoff`] wraps it with
//! the single reconnect timer: at most one attempt is ever scheduled, so
//! several close notifications racing each other cannot stack timers.
//!
//! # Delay Sequence
//!
//! Starting at `initial` with factor `f` and cap `max`, consecutive failures
//! wait `initial, min(initial * f, max), min(initial * f^2, max), ...`.
//! A successful handshake resets the next delay to `initial`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default first reconnect delay.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);

/// Default growth factor.
pub const DEFAULT_FACTOR: f64 = 1.5;

/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(5000);

// ============================================================================
// BackoffConfig
// ============================================================================

/// Reconnect delay parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Floor delay, used for the first attempt and after every reset.
    pub initial: Duration,
    /// Multiplier applied after each failed attempt.
    pub factor: f64,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_DELAY,
            factor: DEFAULT_FACTOR,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl BackoffConfig {
    /// Creates a config from millisecond values.
    #[inline]
    #[must_use]
    pub fn from_millis(initial_ms: u64, factor: f64, max_ms: u64) -> Self {
        Self {
            initial: Duration::from_millis(initial_ms),
            factor,
            max: Duration::from_millis(max_ms),
        }
    }

    /// Checks the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `initial` is zero, `factor` is not a
    /// finite number `>= 1`, or `max < initial`.
    pub fn validate(&self) -> Result<()> {
        if self.initial.is_zero() {
            return Err(Error::config("backoff initial delay must be positive"));
        }

        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(Error::config(format!(
                "backoff factor must be a finite number >= 1, got {}",
                self.factor
            )));
        }

        if self.max < self.initial {
            return Err(Error::config(format!(
                "backoff max delay ({}ms) is below the initial delay ({}ms)",
                self.max.as_millis(),
                self.initial.as_millis()
            )));
        }

        Ok(())
    }
}

// ============================================================================
// BackoffState
// ============================================================================

/// Current reconnect delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    current: Duration,
}

impl BackoffState {
    /// Creates a state at the floor delay.
    #[inline]
    #[must_use]
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            current: config.initial,
        }
    }

    /// Delay the next scheduled attempt will wait.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns the delay for this attempt and grows the next one.
    pub fn advance(&mut self, config: &BackoffConfig) -> Duration {
        let delay = self.current;
        self.current = next_delay(self.current, config);
        delay
    }

    /// Returns to the floor delay.
    #[inline]
    pub fn reset(&mut self, config: &BackoffConfig) {
        self.current = config.initial;
    }
}

/// Computes `min(current * factor, max)`.
///
/// Never returns less than `current`, so float rounding cannot shrink a delay.
#[must_use]
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    Duration::try_from_secs_f64(current.as_secs_f64() * config.factor)
        .map_or(config.max, |scaled| scaled.max(current).min(config.max))
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Backoff
// ============================================================================

/// Reconnect scheduler shared by every connection attempt.
///
/// Cloning yields another handle to the same timer and state.
#[derive(Clone)]
pub struct Backoff {
    inner: Arc<Mutex<BackoffInner>>,
}

struct BackoffInner {
    config: BackoffConfig,
    state: BackoffState,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every schedule and cancel so a stale timer never fires.
    generation: u64,
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Backoff")
            .field("config", &inner.config)
            .field("current", &inner.state.current())
            .field("scheduled", &inner.timer.is_some())
            .finish()
    }
}

impl Backoff {
    /// Creates a scheduler at the floor delay.
    #[must_use]
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BackoffInner {
                config,
                state: BackoffState::new(&config),
                timer: None,
                generation: 0,
            })),
        }
    }

    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> BackoffConfig {
        self.inner.lock().config
    }

    /// Delay the next scheduled attempt will wait.
    #[inline]
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.inner.lock().state.current()
    }

    /// Returns `true` while a reconnect timer is pending.
    #[inline]
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.inner.lock().timer.is_some()
    }

    /// Schedules `retry` after the current delay.
    ///
    /// Does nothing and returns `false` if a timer is already pending. When
    /// the timer fires the delay grows for the following attempt, then
    /// `retry` runs.
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule_next<F>(&self, retry: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.inner.lock();

        if inner.timer.is_some() {
            trace!("Reconnect already scheduled");
            return false;
        }

        inner.generation += 1;
        let generation = inner.generation;
        let delay = inner.state.current();
        let shared = Arc::clone(&self.inner);

        debug!(delay_ms = saturating_millis(delay), "Scheduling reconnect");

        inner.timer = Some(tokio::spawn(async move {
            sleep(delay).await;

            {
                let mut inner = shared.lock();
                if inner.generation != generation {
                    return;
                }
                inner.timer = None;
                let config = inner.config;
                inner.state.advance(&config);
            }

            retry();
        }));

        true
    }

    /// Resets the delay to its floor after a successful handshake.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let config = inner.config;
        inner.state.reset(&config);
    }

    /// Cancels any pending timer, resets the delay and runs `retry` now.
    pub fn force_now<F>(&self, retry: F)
    where
        F: FnOnce(),
    {
        {
            let mut inner = self.inner.lock();
            Self::cancel_locked(&mut inner);
            let config = inner.config;
            inner.state.reset(&config);
        }

        debug!("Forcing immediate reconnect");
        retry();
    }

    /// Cancels the pending timer, if any.
    pub fn cancel(&self) {
        Self::cancel_locked(&mut self.inner.lock());
    }

    fn cancel_locked(inner: &mut BackoffInner) {
        inner.generation += 1;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
            trace!("Cancelled reconnect timer");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use proptest::prelude::*;

    #[test]
    fn test_saturating_millis() {
        assert_eq!(saturating_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(saturating_millis(Duration::from_micros(999)), 0);
        assert_eq!(saturating_millis(Duration::MAX), u64::MAX);
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let count = Arc::new(AtomicUsize::new(0));
        let make = {
            let count = Arc::clone(&count);
            move || -> Box<dyn FnOnce() + Send> {
                let count = Arc::clone(&count);
                Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }
        };
        (count, make)
    }

    #[test]
    fn test_default_config() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial, Duration::from_millis(1000));
        assert_eq!(config.factor, 1.5);
        assert_eq!(config.max, Duration::from_millis(5000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(BackoffConfig::from_millis(0, 1.5, 10).validate().is_err());
        assert!(BackoffConfig::from_millis(10, 0.5, 100).validate().is_err());
        assert!(BackoffConfig::from_millis(10, f64::NAN, 100).validate().is_err());
        assert!(BackoffConfig::from_millis(100, 2.0, 10).validate().is_err());
        assert!(BackoffConfig::from_millis(10, 1.0, 10).validate().is_ok());
    }

    #[test]
    fn test_delay_sequence() {
        let config = BackoffConfig::from_millis(1000, 1.5, 5000);
        let mut state = BackoffState::new(&config);

        let delays: Vec<u128> = (0..6).map(|_| state.advance(&config).as_millis()).collect();
        assert_eq!(delays, vec![1000, 1500, 2250, 3375, 5000, 5000]);

        state.reset(&config);
        assert_eq!(state.current(), Duration::from_millis(1000));
    }

    #[test]
    fn test_next_delay_saturates() {
        let config = BackoffConfig {
            initial: Duration::from_secs(1),
            factor: 1e300,
            max: Duration::MAX,
        };
        assert_eq!(next_delay(Duration::from_secs(u64::MAX / 2), &config), Duration::MAX);
    }

    proptest! {
        #[test]
        fn prop_delays_non_decreasing_and_capped(
            initial_ms in 1u64..10_000,
            factor in 1.0f64..4.0,
            extra_ms in 0u64..100_000,
            steps in 1usize..40,
        ) {
            let config = BackoffConfig::from_millis(initial_ms, factor, initial_ms + extra_ms);
            let mut state = BackoffState::new(&config);
            let mut previous = Duration::ZERO;

            for _ in 0..steps {
                let delay = state.advance(&config);
                prop_assert!(delay >= previous);
                prop_assert!(delay <= config.max);
                previous = delay;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_fires_after_delay_and_grows() {
        let backoff = Backoff::new(BackoffConfig::from_millis(1000, 1.5, 5000));
        let (count, retry) = counter();

        assert!(backoff.schedule_next(retry()));
        assert!(backoff.is_scheduled());

        sleep(Duration::from_millis(999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!backoff.is_scheduled());
        assert_eq!(backoff.current_delay(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_schedule_is_noop() {
        let backoff = Backoff::new(BackoffConfig::default());
        let (count, retry) = counter();

        assert!(backoff.schedule_next(retry()));
        assert!(!backoff.schedule_next(retry()));
        assert!(!backoff.schedule_next(retry()));

        sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fourth_delay_after_three_failures() {
        let backoff = Backoff::new(BackoffConfig::from_millis(1000, 1.5, 5000));
        let (count, retry) = counter();

        for expected in [1000, 1500, 2250] {
            assert_eq!(backoff.current_delay().as_millis(), expected);
            backoff.schedule_next(retry());
            sleep(Duration::from_millis(expected as u64)).await;
            tokio::task::yield_now().await;
        }

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(backoff.current_delay().as_millis(), 3375);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_after_success() {
        let backoff = Backoff::new(BackoffConfig::from_millis(1000, 2.0, 8000));
        let (_count, retry) = counter();

        backoff.schedule_next(retry());
        sleep(Duration::from_millis(1001)).await;
        backoff.schedule_next(retry());
        sleep(Duration::from_millis(2001)).await;
        assert_eq!(backoff.current_delay(), Duration::from_millis(4000));

        backoff.reset();
        assert_eq!(backoff.current_delay(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_now_cancels_timer() {
        let backoff = Backoff::new(BackoffConfig::from_millis(1000, 2.0, 8000));
        let (count, retry) = counter();

        backoff.schedule_next(retry());
        sleep(Duration::from_millis(1001)).await;
        assert_eq!(backoff.current_delay(), Duration::from_millis(2000));

        backoff.schedule_next(retry());
        backoff.force_now(retry());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!backoff.is_scheduled());
        assert_eq!(backoff.current_delay(), Duration::from_millis(1000));

        // The cancelled timer never fires.
        sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let backoff = Backoff::new(BackoffConfig::default());
        let (count, retry) = counter();

        backoff.schedule_next(retry());
        backoff.cancel();
        assert!(!backoff.is_scheduled());

        sleep(Duration::from_secs(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(backoff.current_delay(), Duration::from_millis(1000));
    }
}
