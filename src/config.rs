//! Static capacities and runtime configuration
//!
//! Capacities are compile-time constants so every table in the runtime is
//! pre-sized; everything tunable at startup lives in [`RuntimeConfig`].

use crate::error::{Result, RtError};
use crate::timer::Tick;

/// Maximum tasks the runtime can manage
pub const MAX_TASKS: usize = 8;

/// Number of status slots published to the monitor
pub const STATUS_SLOTS: usize = 4;

/// Bytes per status slot
pub const STATUS_CAPACITY: usize = 22;

/// Task names are truncated to this many bytes
pub const TASK_NAME_LEN: usize = 16;

/// Startup configuration, validated by [`Kernel::start`](crate::Kernel::start)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Kernel tick frequency
    pub tick_rate_hz: u32,
    /// Number of usable priority levels; valid task priorities are `0..max_priorities`
    pub max_priorities: u8,
    /// Ticks between automatic load samples (0 = sample only on request)
    pub load_sample_period: Tick,
}

impl RuntimeConfig {
    /// 1 kHz tick, five priority levels, load sampled every three seconds
    pub const DEFAULT: RuntimeConfig = RuntimeConfig {
        tick_rate_hz: 1000,
        max_priorities: 5,
        load_sample_period: 3000,
    };

    pub const fn with_tick_rate(mut self, tick_rate_hz: u32) -> Self {
        self.tick_rate_hz = tick_rate_hz;
        self
    }

    pub const fn with_max_priorities(mut self, max_priorities: u8) -> Self {
        self.max_priorities = max_priorities;
        self
    }

    pub const fn with_load_sample_period(mut self, ticks: Tick) -> Self {
        self.load_sample_period = ticks;
        self
    }

    /// Convert milliseconds to ticks at the configured rate (rounded down)
    pub const fn ticks_from_ms(&self, ms: u64) -> Tick {
        ms * self.tick_rate_hz as u64 / 1000
    }

    /// Reject configurations the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.tick_rate_hz == 0 || self.max_priorities == 0 {
            return Err(RtError::InvalidConfig);
        }
        // 255 is reserved for the idle level
        if self.max_priorities == u8::MAX {
            return Err(RtError::InvalidConfig);
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
