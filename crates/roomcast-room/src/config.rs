//! Room configuration and timer state.

use std::time::Duration;

use roomcast_tick::TickConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Settings shared by every room a [`RoomManager`](crate::RoomManager) creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Schedule of the per-room counter timer. Defaults to one tick per
    /// second, no jitter.
    pub tick: TickConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            tick: TickConfig::default(),
        }
    }
}

impl RoomConfig {
    /// Default config with a different tick interval.
    pub fn with_tick_interval(interval: Duration) -> Self {
        Self {
            tick: TickConfig::every(interval),
        }
    }
}

// ---------------------------------------------------------------------------
// TimerState
// ---------------------------------------------------------------------------

/// Whether a room's counter timer is running.
///
/// ```text
/// Inactive ──(member count 0 → 1)──→ Active
///     ↑                                 │
///     └───────(member count → 0)────────┘
/// ```
///
/// Both transitions reset the counter to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimerState {
    #[default]
    Inactive,
    Active,
}

impl TimerState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for TimerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "Inactive"),
            Self::Active => write!(f, "Active"),
        }
    }
}
