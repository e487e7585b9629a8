#![forbid(unsafe_code)]

//! Task priority levels and their timeouts.
//!
//! A task's expiration time is `start_time + timeout`. The ready heap is
//! ordered by expiration, so the timeout table is what turns a coarse
//! priority class into a position in the queue.
//!
//! | Level | Timeout |
//! |-------|---------|
//! | `Immediate` | -1 ms (already expired) |
//! | `UserBlocking` | 250 ms |
//! | `Normal` | 5 000 ms |
//! | `Low` | 10 000 ms |
//! | `Idle` | effectively never |

use std::fmt;

/// Timeout applied to `Immediate` tasks. Negative so they are expired on arrival.
pub const IMMEDIATE_TIMEOUT_MS: f64 = -1.0;

/// Timeout applied to `UserBlocking` tasks.
pub const USER_BLOCKING_TIMEOUT_MS: f64 = 250.0;

/// Timeout applied to `Normal` tasks.
pub const NORMAL_TIMEOUT_MS: f64 = 5_000.0;

/// Timeout applied to `Low` tasks.
pub const LOW_TIMEOUT_MS: f64 = 10_000.0;

/// Timeout applied to `Idle` tasks (max 31-bit integer, ~12.4 days).
pub const IDLE_TIMEOUT_MS: f64 = 1_073_741_823.0;

/// Scheduling priority of a task.
///
/// Ordering follows urgency: `Immediate < UserBlocking < ... < Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PriorityLevel {
    /// Must run now; never yields to the frame deadline.
    Immediate,
    /// Results of user interaction (clicks, key presses).
    UserBlocking,
    /// Default for work without a stronger claim.
    #[default]
    Normal,
    /// Work that can wait, but should not starve.
    Low,
    /// Work that only runs when nothing else is pending.
    Idle,
}

impl PriorityLevel {
    /// All levels in urgency order.
    pub const ALL: [PriorityLevel; 5] = [
        PriorityLevel::Immediate,
        PriorityLevel::UserBlocking,
        PriorityLevel::Normal,
        PriorityLevel::Low,
        PriorityLevel::Idle,
    ];

    /// Timeout from the start time after which the task counts as expired.
    pub const fn timeout_ms(self) -> f64 {
        match self {
            PriorityLevel::Immediate => IMMEDIATE_TIMEOUT_MS,
            PriorityLevel::UserBlocking => USER_BLOCKING_TIMEOUT_MS,
            PriorityLevel::Normal => NORMAL_TIMEOUT_MS,
            PriorityLevel::Low => LOW_TIMEOUT_MS,
            PriorityLevel::Idle => IDLE_TIMEOUT_MS,
        }
    }

    /// Short lowercase label used in traces.
    pub const fn as_str(self) -> &'static str {
        match self {
            PriorityLevel::Immediate => "immediate",
            PriorityLevel::UserBlocking => "user-blocking",
            PriorityLevel::Normal => "normal",
            PriorityLevel::Low => "low",
            PriorityLevel::Idle => "idle",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
