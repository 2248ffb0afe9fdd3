//! Logical ticks to wall-clock deadlines.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};
use trace_runtime::TICKS_PER_SECOND;

/// Slowest speed multiplier accepted before deadlines stop fitting a
/// `Duration`.
pub const MIN_SPEED: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("tick scheduler used before start()")]
    NotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The deadline was in the future; the caller slept this long.
    OnTime { slept: Duration },
    /// The deadline had already passed by `lag`. Nothing is skipped.
    Behind { lag: Duration },
}

impl WaitOutcome {
    pub fn lag(&self) -> Duration {
        match self {
            WaitOutcome::OnTime { .. } => Duration::ZERO,
            WaitOutcome::Behind { lag } => *lag,
        }
    }

    pub fn is_behind(&self) -> bool {
        matches!(self, WaitOutcome::Behind { .. })
    }
}

/// Maps tick `t` to `start + t / (60 * speed)` seconds.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    speed: f64,
    started: Option<Instant>,
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl TickScheduler {
    pub fn new(speed: f64) -> Self {
        let speed = if speed.is_finite() && speed > 0.0 {
            speed.max(MIN_SPEED)
        } else {
            warn!(target: "replay::scheduler", speed, "scheduler.speed=invalid");
            1.0
        };
        Self {
            speed,
            started: None,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn tick_duration(&self) -> Duration {
        self.tick_offset(1)
    }

    /// Records the reference instant. Calling it again restarts the clock.
    pub fn start(&mut self) -> Instant {
        let now = Instant::now();
        self.started = Some(now);
        debug!(target: "replay::scheduler", speed = self.speed, "scheduler.started");
        now
    }

    pub fn is_started(&self) -> bool {
        self.started.is_some()
    }

    pub fn started_at(&self) -> Result<Instant, SchedulerError> {
        self.started.ok_or(SchedulerError::NotStarted)
    }

    pub fn tick_offset(&self, tick: u64) -> Duration {
        let seconds = tick as f64 / (f64::from(TICKS_PER_SECOND) * self.speed);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }

    pub fn deadline(&self, tick: u64) -> Result<Instant, SchedulerError> {
        let start = self.started_at()?;
        // Unreachable deadlines collapse to "far away" rather than panicking.
        Ok(start
            .checked_add(self.tick_offset(tick))
            .unwrap_or_else(|| start + Duration::from_secs(u32::MAX as u64)))
    }

    /// Blocks until `tick`'s deadline, or returns at once with the overrun.
    pub fn wait_for_tick(&self, tick: u64) -> Result<WaitOutcome, SchedulerError> {
        let deadline = self.deadline(tick)?;
        let now = Instant::now();
        match deadline.checked_duration_since(now) {
            Some(remaining) if !remaining.is_zero() => {
                thread::sleep(remaining);
                Ok(WaitOutcome::OnTime { slept: remaining })
            }
            _ => {
                let lag = now.saturating_duration_since(deadline);
                debug!(
                    target: "replay::scheduler",
                    tick,
                    lag_ms = lag.as_secs_f64() * 1000.0,
                    "scheduler.behind"
                );
                Ok(WaitOutcome::Behind { lag })
            }
        }
    }

    pub fn elapsed(&self) -> Result<Duration, SchedulerError> {
        Ok(self.started_at()?.elapsed())
    }

    /// Logical tick reached by the wall clock so far.
    pub fn current_tick(&self) -> Result<u64, SchedulerError> {
        let elapsed = self.elapsed()?;
        Ok(self.ticks_in(elapsed))
    }

    pub fn ticks_in(&self, elapsed: Duration) -> u64 {
        (elapsed.as_secs_f64() * f64::from(TICKS_PER_SECOND) * self.speed).floor() as u64
    }
}
