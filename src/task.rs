//! Periodic task definition: static, no-alloc task descriptors
//!
//! A task is a body invoked once per period, paced by an absolute deadline.
//! The descriptor is owned by the task table and only advanced from the
//! task's own cycle; nothing outside resets its deadline.

use core::fmt;

use heapless::String;

use crate::config::TASK_NAME_LEN;
use crate::error::StatusError;
use crate::status::{bounded_prefix, Board, WriteOutcome};
use crate::timer::{DelayUntil, Tick, Wake};

/// Opaque handle for a created task (its slot in the task table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(usize);

impl TaskId {
    pub const fn new(index: usize) -> Self {
        TaskId(index)
    }

    /// Slot in the task table
    pub const fn index(self) -> usize {
        self.0
    }

    /// Numeric application tag (1-based; 0 is reserved for idle)
    pub const fn tag(self) -> u32 {
        self.0 as u32 + 1
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "T{:03}", self.0)
    }
}

/// Task priority (lower number = higher priority)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    /// Highest priority (liveness check)
    pub const CRITICAL: TaskPriority = TaskPriority(0);
    /// High priority (control loops)
    pub const HIGH: TaskPriority = TaskPriority(1);
    /// Normal priority (input polling, bus traffic)
    pub const NORMAL: TaskPriority = TaskPriority(2);
    /// Low priority (logging, telemetry)
    pub const LOW: TaskPriority = TaskPriority(3);
    /// Idle level, never assignable to a task
    pub const IDLE: TaskPriority = TaskPriority(255);

    /// Valid for a kernel configured with `max_priorities` levels?
    pub const fn is_valid(self, max_priorities: u8) -> bool {
        self.0 < max_priorities
    }
}

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Released, waiting for the CPU
    Ready,
    /// Currently executing
    Running,
    /// Blocked until its next deadline
    Sleeping,
}

/// Static task descriptor
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    id: TaskId,
    name: String<TASK_NAME_LEN>,
    priority: TaskPriority,
    pacer: DelayUntil,
    /// Cycles started
    cycles: u32,
    /// Cycles that finished after the next release
    overruns: u32,
    /// Largest lateness seen at a delay-until point
    worst_lateness: Tick,
}

impl TaskDescriptor {
    /// Describe a task anchored at `start`; names longer than
    /// [`TASK_NAME_LEN`] are cut
    pub fn new(id: TaskId, name: &str, priority: TaskPriority, period: Tick, start: Tick) -> Self {
        let (name, _) = bounded_prefix(name, TASK_NAME_LEN);
        let mut n = String::new();
        // Cannot fail: the prefix is bounded by the capacity
        let _ = n.push_str(name);

        Self {
            id,
            name: n,
            priority,
            pacer: DelayUntil::new(start, period),
            cycles: 0,
            overruns: 0,
            worst_lateness: 0,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn tag(&self) -> u32 {
        self.id.tag()
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn period(&self) -> Tick {
        self.pacer.period()
    }

    /// Release time of the current cycle
    pub fn deadline(&self) -> Tick {
        self.pacer.deadline()
    }

    /// Tick the deadline sequence is anchored to
    pub fn start(&self) -> Tick {
        self.pacer.anchor()
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn overruns(&self) -> u32 {
        self.overruns
    }

    pub fn worst_lateness(&self) -> Tick {
        self.worst_lateness
    }

    /// Frequency in Hz at the given tick rate
    pub fn frequency_hz(&self, tick_rate_hz: u32) -> f32 {
        if self.period() == 0 {
            0.0
        } else {
            tick_rate_hz as f32 / self.period() as f32
        }
    }

    pub(crate) fn is_due(&self, now: Tick) -> bool {
        self.pacer.is_due(now)
    }

    /// Re-anchor the deadline sequence to `start` if it was anchored earlier
    pub(crate) fn anchor_at(&mut self, start: Tick) {
        if self.pacer.anchor() < start {
            self.pacer = DelayUntil::new(start, self.pacer.period());
        }
    }

    pub(crate) fn begin_cycle(&mut self) {
        self.cycles = self.cycles.wrapping_add(1);
    }

    /// Delay-until point at the end of a cycle
    pub(crate) fn end_cycle(&mut self, now: Tick) -> Wake {
        let wake = self.pacer.advance(now);
        if let Wake::Immediate { late_by } = wake {
            if late_by > 0 {
                self.overruns = self.overruns.saturating_add(1);
                self.worst_lateness = self.worst_lateness.max(late_by);
                log_warn!("task {} overran by {} ticks", self.name.as_str(), late_by);
            }
        }
        wake
    }
}

/// View of the runtime handed to a task body for one cycle
pub struct TaskContext<'c> {
    id: TaskId,
    now: Tick,
    cycle: u32,
    status: &'c Board,
    peers: &'c [u32],
}

impl<'c> TaskContext<'c> {
    pub(crate) fn new(id: TaskId, now: Tick, cycle: u32, status: &'c Board, peers: &'c [u32]) -> Self {
        Self {
            id,
            now,
            cycle,
            status,
            peers,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn tag(&self) -> u32 {
        self.id.tag()
    }

    /// Tick at which this cycle started running
    pub fn now(&self) -> Tick {
        self.now
    }

    /// 1-based cycle number
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    /// Publish to this task's own status slot
    pub fn set_status(&self, text: &str) -> Result<WriteOutcome, StatusError> {
        self.status.set_status(self.id, text)
    }

    pub fn status(&self) -> &'c Board {
        self.status
    }

    /// Cycle counters of every task, indexed by [`TaskId::index`]
    pub fn peer_cycles(&self) -> &'c [u32] {
        self.peers
    }
}

/// Work executed once per period
pub trait TaskBody {
    /// Run one cycle and return the CPU ticks it consumes
    ///
    /// Side effects happen when the cycle is dispatched; the returned cost is
    /// charged (preemptibly) before the task reaches its delay-until point.
    fn run(&mut self, cx: &mut TaskContext<'_>) -> Tick;
}

impl<F> TaskBody for F
where
    F: FnMut(&mut TaskContext<'_>) -> Tick,
{
    fn run(&mut self, cx: &mut TaskContext<'_>) -> Tick {
        self(cx)
    }
}
