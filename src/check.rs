//! Liveness check task
//!
//! Runs at the highest priority so it always gets the CPU. Every check window
//! it verifies that every other task completed at least one cycle since the
//! previous window. A task that stalls latches the failure for good.
//!
//! The LED signals health by its toggle rate: once per window while healthy,
//! every cycle once a failure has been seen.

use crate::config::MAX_TASKS;
use crate::error::Result;
use crate::hal::{DigitalOutput, PinLevel};
use crate::kernel::Kernel;
use crate::task::{TaskBody, TaskContext, TaskId, TaskPriority};
use crate::timer::Tick;

/// Check task period
pub const CHECK_PERIOD: Tick = 500;

/// Cycles per check window (3 s at the default tick rate)
pub const CHECK_WINDOW: u32 = 6;

pub struct LivenessCheck<P: DigitalOutput> {
    led: P,
    led_on: bool,
    window: u32,
    /// Cycle counters at the previous window
    snapshot: [u32; MAX_TASKS],
    /// First stalled task seen
    failed: Option<TaskId>,
    checks: u32,
    led_faults: u32,
}

impl<P: DigitalOutput> LivenessCheck<P> {
    pub fn new(led: P) -> Self {
        Self {
            led,
            led_on: false,
            window: CHECK_WINDOW,
            snapshot: [0; MAX_TASKS],
            failed: None,
            checks: 0,
            led_faults: 0,
        }
    }

    /// Cycles per check window (at least one)
    pub fn with_window(mut self, cycles: u32) -> Self {
        self.window = cycles.max(1);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.failed.is_none()
    }

    /// First task found stalled
    pub fn failed_task(&self) -> Option<TaskId> {
        self.failed
    }

    /// Windows evaluated
    pub fn checks(&self) -> u32 {
        self.checks
    }

    pub fn led_faults(&self) -> u32 {
        self.led_faults
    }

    fn check(&mut self, me: TaskId, peers: &[u32]) {
        self.checks += 1;
        for (idx, (&now, &before)) in peers.iter().zip(self.snapshot.iter()).enumerate() {
            if idx == me.index() || self.failed.is_some() {
                continue;
            }
            if now == before {
                self.failed = Some(TaskId::new(idx));
                log_warn!("liveness check: task {} stalled at cycle {}", idx, now);
            }
        }
        self.take_snapshot(peers);
    }

    fn take_snapshot(&mut self, peers: &[u32]) {
        for (dst, &count) in self.snapshot.iter_mut().zip(peers) {
            *dst = count;
        }
    }

    fn toggle_led(&mut self) {
        self.led_on = !self.led_on;
        let level = if self.led_on { PinLevel::High } else { PinLevel::Low };
        if self.led.write(level).is_err() {
            self.led_faults += 1;
        }
    }
}

impl<P: DigitalOutput> TaskBody for LivenessCheck<P> {
    fn run(&mut self, cx: &mut TaskContext<'_>) -> Tick {
        let cycle = cx.cycle();
        if cycle == 1 {
            self.take_snapshot(cx.peer_cycles());
        } else if cycle.wrapping_sub(1) % self.window == 0 {
            self.check(cx.id(), cx.peer_cycles());
            if self.failed.is_none() {
                self.toggle_led();
            }
        }

        if self.failed.is_some() {
            self.toggle_led();
        }
        1
    }
}

/// Create the check task at the highest priority
pub fn spawn<'a, P: DigitalOutput + 'a>(
    kernel: &mut Kernel<'a>,
    check: &'a mut LivenessCheck<P>,
) -> Result<TaskId> {
    kernel.create_periodic(check, "check", TaskPriority::CRITICAL, CHECK_PERIOD)
}
