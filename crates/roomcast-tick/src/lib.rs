//! Fixed-interval tick scheduler for roomcast.
//!
//! Each active room owns one [`TickScheduler`] inside its timer task. The
//! scheduler only decides *when* the next tick is due; what happens on a
//! tick (counter increment, broadcast) belongs to the room.
//!
//! # Idle mode
//!
//! A zero interval puts the scheduler in idle mode: [`TickScheduler::wait_for_tick`]
//! pends forever, which is harmless inside a `tokio::select!`.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         biased;
//!         _ = stop.wait_for(|stopped| *stopped) => break,
//!         info = scheduler.wait_for_tick() => { /* bump counter, broadcast */ }
//!     }
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a tick fires noticeably late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TickPolicy {
    /// Skip the missed tick(s) and schedule the next one from now.
    #[default]
    Skip,
    /// Keep the original cadence; the next tick fires at its planned time
    /// even if that is immediately.
    Drop,
}

/// Configuration for the tick scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickConfig {
    /// Time between ticks. Zero means idle (never ticks).
    pub interval: Duration,
    /// Overrun handling policy.
    pub policy: TickPolicy,
    /// Upper bound of a random delay added to the *first* tick, so rooms
    /// activated in the same instant don't all tick together.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            policy: TickPolicy::default(),
            initial_jitter: Duration::ZERO,
        }
    }
}

impl TickConfig {
    /// Shortest interval the scheduler will run at.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// A config with the given interval and default policy, no jitter.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    ///
    /// A non-zero interval below [`Self::MIN_INTERVAL`] is raised to it.
    pub fn validated(mut self) -> Self {
        if !self.interval.is_zero() && self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_us = self.interval.as_micros() as u64,
                "tick interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self
    }

    /// The tick interval, or `None` in idle mode.
    pub fn tick_interval(&self) -> Option<Duration> {
        (!self.interval.is_zero()).then_some(self.interval)
    }
}

// ---------------------------------------------------------------------------
// Tick info and metrics
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// `true` if this tick fired more than 10% of an interval late.
    pub overrun: bool,
    /// How many whole intervals were skipped because of the overrun.
    pub ticks_skipped: u64,
}

/// Running totals for one scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-interval tick scheduler. One per active room timer.
pub struct TickScheduler {
    config: TickConfig,
    interval: Option<Duration>,
    tick_count: u64,
    /// When the next tick should fire.
    next_tick: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Creates a scheduler whose first tick is one interval (plus jitter)
    /// from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let interval = config.tick_interval();

        let next_tick = interval.map(|d| {
            let jitter = if config.initial_jitter.is_zero() {
                Duration::ZERO
            } else {
                let max_us = config.initial_jitter.as_micros() as u64;
                Duration::from_micros(rand::rng().random_range(0..max_us.max(1)))
            };
            Instant::now() + d + jitter
        });

        match interval {
            None => debug!("tick scheduler created in idle mode"),
            Some(d) => debug!(
                interval_ms = d.as_millis() as u64,
                policy = ?config.policy,
                "tick scheduler created"
            ),
        }

        Self {
            config,
            interval,
            tick_count: 0,
            next_tick,
            metrics: TickMetrics::default(),
        }
    }

    /// A scheduler ticking every `interval` with default settings.
    pub fn every(interval: Duration) -> Self {
        Self::new(TickConfig::every(interval))
    }

    /// Waits until the next tick is due.
    ///
    /// In idle mode this future never resolves. It is cancel-safe: dropping
    /// it before it resolves leaves the schedule untouched.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, interval) = match (self.next_tick, self.interval) {
            (Some(next), Some(interval)) => (next, interval),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > interval / 10;
        let mut ticks_skipped = 0u64;

        self.next_tick = Some(match self.config.policy {
            TickPolicy::Skip => {
                if overrun {
                    ticks_skipped = (late_by.as_nanos() / interval.as_nanos()) as u64;
                    if ticks_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = ticks_skipped,
                            late_ms = late_by.as_millis() as u64,
                            "tick overrun, skipping ahead"
                        );
                    }
                }
                now + interval
            }
            TickPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_millis() as u64,
                        "tick overrun, keeping cadence"
                    );
                }
                next + interval
            }
        });

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Whether this scheduler never ticks (zero interval).
    pub fn is_idle(&self) -> bool {
        self.interval.is_none()
    }

    /// Number of ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    /// The tick interval, or `None` in idle mode.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }
}
