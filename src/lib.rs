//! periodic-rt: periodic task runtime
//!
//! Drift-free periodic tasks on a fixed-priority preemptive kernel:
//! - Static task table (no heap, no allocation)
//! - Absolute-deadline pacing with per-task overrun counters
//! - Per-task execution accounting from the context-switch hook
//! - Windowed CPU load estimation
//! - Tear-free per-task status slots for an external monitor

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod logging;

pub mod accounting;
pub mod app;
#[cfg(feature = "liveness")]
pub mod check;
pub mod config;
pub mod error;
pub mod hal;
pub mod kernel;
pub mod load;
pub mod scheduler;
pub mod status;
pub mod task;
pub mod timer;

pub use accounting::{Accounting, AccountingRecord, SwitchHook, SystemTotals};
pub use config::RuntimeConfig;
pub use error::{LoadError, Result, RtError, StatusError};
pub use kernel::{Diagnostics, Kernel, KernelStats};
pub use load::{LoadEstimator, LoadSample};
pub use scheduler::Scheduler;
pub use status::{StatusBoard, StatusSlot, WriteOutcome};
pub use task::{TaskBody, TaskContext, TaskDescriptor, TaskId, TaskPriority, TaskState};
pub use timer::{DelayUntil, Heartbeat, SysTimer, Tick, TickHook, Wake};
