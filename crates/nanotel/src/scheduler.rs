//! Flush Scheduler - Pure Per-Channel Policy
//!
//! Decides *when* a channel's buffer should be drained and what happens after
//! a failed send. Like the batching policy it replaces, it owns no runtime
//! machinery: no timers, no tasks, no exporter. Every decision is returned as
//! a [`FlushAction`] and the [`Client`](crate::Client) carries it out on tokio.
//! That keeps the policy testable without a runtime.
//!
//! # Batching modes
//!
//! | `BatchTime`   | On enqueue                                   |
//! |---------------|----------------------------------------------|
//! | `Immediate`   | drain and send right away                    |
//! | `After(d)`    | first enqueue arms one timer; later ones ride it |
//! | `Never`       | nothing; only an explicit flush sends        |
//!
//! # Failure handling
//!
//! A failed batch is re-queued by the client, then [`ChannelSchedule::on_send_failure`]
//! arms a retry timer of `max(batch delay, backoff(attempt))`. If a timer is
//! already pending the retry rides on it. With `max_retries: None` retries
//! never stop.

use std::time::Duration;

/// Default batching window.
pub const DEFAULT_BATCH_TIME: Duration = Duration::from_secs(5);

/// How long enqueued events wait before being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchTime {
    /// Every enqueue triggers a send.
    Immediate,
    /// The first enqueue after a flush starts a timer of this duration.
    After(Duration),
    /// Never flush automatically.
    Never,
}

impl Default for BatchTime {
    fn default() -> Self {
        Self::After(DEFAULT_BATCH_TIME)
    }
}

impl BatchTime {
    /// Interprets a millisecond count: `0` sends immediately, infinity never.
    ///
    /// Negative and NaN inputs are treated as `0`. Windows too long for a
    /// `Duration` are treated as infinity.
    pub fn from_millis(millis: f64) -> Self {
        if millis.is_nan() || millis <= 0.0 {
            Self::Immediate
        } else {
            Duration::try_from_secs_f64(millis / 1000.0).map_or(Self::Never, Self::After)
        }
    }

    /// Delay before an armed timer fires (`Immediate` counts as zero).
    fn delay(self) -> Option<Duration> {
        match self {
            Self::Immediate => Some(Duration::ZERO),
            Self::After(delay) => Some(delay),
            Self::Never => None,
        }
    }
}

/// Configuration for retrying failed sends.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Consecutive failed retries tolerated before a batch is dropped
    /// (`None` = retry forever).
    pub max_retries: Option<u32>,
    /// Backoff before the first retry.
    pub initial_delay: Duration,
    /// Maximum backoff between retries (caps exponential growth).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = double delay each retry).
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff for a given retry attempt (1-indexed; 0 means no delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// What the client should do next for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushAction {
    /// Drain and send now.
    SendNow,
    /// Start the channel's timer; drain and send when it fires.
    ArmTimer(Duration),
    /// Nothing to do (timer already pending, or auto-flush disabled).
    Idle,
    /// Give up on the re-queued batch.
    Drop,
}

/// Scheduling state of one channel.
#[derive(Debug, Default, Clone)]
pub struct ChannelSchedule {
    armed: bool,
    failures: u32,
}

impl ChannelSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a timer is currently pending for this channel.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Consecutive failed sends since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// An event was added to the channel.
    pub fn on_enqueue(&mut self, batch_time: BatchTime) -> FlushAction {
        match batch_time {
            BatchTime::Immediate => FlushAction::SendNow,
            BatchTime::Never => FlushAction::Idle,
            BatchTime::After(delay) => self.arm(delay),
        }
    }

    /// The pending timer fired; the next enqueue may arm a fresh one.
    pub fn on_timer_fired(&mut self) {
        self.armed = false;
    }

    /// The pending timer was cancelled (shutdown).
    pub fn on_timer_cancelled(&mut self) {
        self.armed = false;
    }

    pub fn on_send_success(&mut self) {
        self.failures = 0;
    }

    /// A send failed and its batch was re-queued.
    pub fn on_send_failure(&mut self, batch_time: BatchTime, retry: &RetryConfig) -> FlushAction {
        self.failures = self.failures.saturating_add(1);

        // The first failure is the original attempt; retries start after it
        let retries = self.failures - 1;
        if retry.max_retries.is_some_and(|max| retries >= max) {
            self.failures = 0;
            return FlushAction::Drop;
        }

        let Some(batch_delay) = batch_time.delay() else {
            return FlushAction::Idle;
        };
        let delay = batch_delay.max(retry.delay_for_attempt(self.failures));
        self.arm(delay)
    }

    fn arm(&mut self, delay: Duration) -> FlushAction {
        if self.armed {
            FlushAction::Idle
        } else {
            self.armed = true;
            FlushAction::ArmTimer(delay)
        }
    }
}
