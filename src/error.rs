//! Runtime error types
//!
//! Startup errors (`TaskTableFull`, `InvalidPeriod`, ...) are fatal and must be
//! handled before [`Kernel::start`](crate::Kernel::start). Steady-state errors
//! (`Status`, `Load`) are local conditions: the runtime counts them and keeps
//! running.

use core::fmt;

use crate::timer::Tick;

/// Result type for runtime operations
pub type Result<T> = core::result::Result<T, RtError>;

/// Runtime-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RtError {
    /// No room left in the task table (control block / stack exhausted)
    TaskTableFull,
    /// Task period must be a positive tick count
    InvalidPeriod,
    /// Priority outside the configured range
    InvalidPriority(u8),
    /// The task set is static once the kernel has started
    AlreadyStarted,
    /// Runtime configuration rejected
    InvalidConfig,
    /// No task with this index
    UnknownTask(usize),
    /// Status buffer operation failed
    Status(StatusError),
    /// Load computation found inconsistent accounting
    Load(LoadError),
}

/// Status buffer errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusError {
    /// Slot index outside the board
    NoSuchSlot,
    /// Another writer holds the slot
    WriterBusy,
    /// Reader kept observing an in-progress write
    Contended,
}

/// Load estimator errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadError {
    /// Idle delta negative or larger than the elapsed delta
    OutOfRange {
        /// Elapsed ticks since the previous sample
        elapsed: Tick,
        /// Idle delta observed (saturated at zero when negative)
        idle: Tick,
    },
}

impl From<StatusError> for RtError {
    fn from(e: StatusError) -> Self {
        RtError::Status(e)
    }
}

impl From<LoadError> for RtError {
    fn from(e: LoadError) -> Self {
        RtError::Load(e)
    }
}

impl fmt::Display for RtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtError::TaskTableFull => write!(f, "task table full"),
            RtError::InvalidPeriod => write!(f, "task period must be at least one tick"),
            RtError::InvalidPriority(p) => write!(f, "invalid task priority {}", p),
            RtError::AlreadyStarted => write!(f, "kernel already started"),
            RtError::InvalidConfig => write!(f, "invalid runtime configuration"),
            RtError::UnknownTask(idx) => write!(f, "unknown task T{:03}", idx),
            RtError::Status(e) => write!(f, "status error: {}", e),
            RtError::Load(e) => write!(f, "load error: {}", e),
        }
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusError::NoSuchSlot => write!(f, "no such status slot"),
            StatusError::WriterBusy => write!(f, "status slot busy"),
            StatusError::Contended => write!(f, "status slot contended"),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::OutOfRange { elapsed, idle } => {
                write!(f, "idle delta {} out of range for elapsed {}", idle, elapsed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_converts() {
        let e: RtError = StatusError::NoSuchSlot.into();
        assert_eq!(e, RtError::Status(StatusError::NoSuchSlot));
    }

    #[test]
    fn test_display() {
        assert_eq!(RtError::UnknownTask(3).to_string(), "unknown task T003");
        assert_eq!(
            RtError::Load(LoadError::OutOfRange { elapsed: 10, idle: 12 }).to_string(),
            "load error: idle delta 12 out of range for elapsed 10"
        );
    }
}
