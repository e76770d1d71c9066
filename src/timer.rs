//! System timer and absolute-deadline pacing
//!
//! [`SysTimer`] is the kernel tick counter, advanced once per tick interrupt.
//! [`DelayUntil`] is the delay-until primitive periodic tasks pace themselves
//! with: the next wake time is always the previous deadline plus one period,
//! never "now + period", so jitter and overrun in one cycle do not shift the
//! cycles after it.

use crate::hal::{DigitalOutput, PinLevel};

/// Kernel time unit
pub type Tick = u64;

/// System tick counter
pub struct SysTimer {
    /// Ticks since power-on
    ticks: Tick,
    /// Tick frequency
    tick_rate_hz: u32,
}

impl SysTimer {
    /// Create a timer running at `tick_rate_hz`
    pub const fn new(tick_rate_hz: u32) -> Self {
        Self {
            ticks: 0,
            tick_rate_hz,
        }
    }

    /// Advance time by `ticks`
    pub fn advance(&mut self, ticks: Tick) {
        self.ticks = self.ticks.saturating_add(ticks);
    }

    /// Current tick count
    pub fn now(&self) -> Tick {
        self.ticks
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        if self.tick_rate_hz == 0 {
            return 0;
        }
        self.ticks * 1000 / self.tick_rate_hz as u64
    }

    /// Tick frequency
    pub fn tick_rate_hz(&self) -> u32 {
        self.tick_rate_hz
    }

    /// Ticks elapsed since a reference point
    pub fn elapsed_since(&self, reference: Tick) -> Tick {
        self.ticks.saturating_sub(reference)
    }
}

/// Outcome of one delay-until call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Block until this absolute tick
    At(Tick),
    /// Deadline already reached; the task is released again without blocking
    Immediate {
        /// Ticks past the deadline; non-zero means the cycle overran
        late_by: Tick,
    },
}

impl Wake {
    /// Did the cycle finish after its successor's release time?
    pub fn is_overrun(&self) -> bool {
        matches!(self, Wake::Immediate { late_by } if *late_by > 0)
    }
}

/// Absolute-deadline pacer for one periodic task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayUntil {
    /// Tick the task was anchored to
    anchor: Tick,
    /// Release time of the current cycle
    deadline: Tick,
    /// Period in ticks
    period: Tick,
}

impl DelayUntil {
    /// Anchor a pacer at `start`; the first release is `start` itself
    pub const fn new(start: Tick, period: Tick) -> Self {
        Self {
            anchor: start,
            deadline: start,
            period,
        }
    }

    /// Release time of the current cycle
    pub fn deadline(&self) -> Tick {
        self.deadline
    }

    /// Tick the deadline sequence started from
    pub fn anchor(&self) -> Tick {
        self.anchor
    }

    /// Period in ticks
    pub fn period(&self) -> Tick {
        self.period
    }

    /// Move to the next period boundary and decide whether to block
    pub fn advance(&mut self, now: Tick) -> Wake {
        self.deadline = self.deadline.saturating_add(self.period);
        if self.deadline > now {
            Wake::At(self.deadline)
        } else {
            Wake::Immediate {
                late_by: now - self.deadline,
            }
        }
    }

    /// Whether the current cycle has been released at `now`
    pub fn is_due(&self, now: Tick) -> bool {
        now >= self.deadline
    }

    /// Ticks until the current release (0 once due)
    pub fn remaining(&self, now: Tick) -> Tick {
        self.deadline.saturating_sub(now)
    }
}

/// Callback invoked once per tick interrupt
pub trait TickHook {
    fn on_tick(&mut self, now: Tick);
}

/// Tick-hook heartbeat: one short pulse on a diagnostic pin per tick
///
/// Observable with a logic probe; plays no part in scheduling.
pub struct Heartbeat<P: DigitalOutput> {
    pin: P,
    pulses: u64,
    faults: u32,
}

impl<P: DigitalOutput> Heartbeat<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin,
            pulses: 0,
            faults: 0,
        }
    }

    /// Pulses emitted
    pub fn pulses(&self) -> u64 {
        self.pulses
    }

    /// Pin writes that failed
    pub fn faults(&self) -> u32 {
        self.faults
    }

    pub fn pin(&self) -> &P {
        &self.pin
    }
}

impl<P: DigitalOutput> TickHook for Heartbeat<P> {
    fn on_tick(&mut self, _now: Tick) {
        let high = self.pin.write(PinLevel::High);
        let low = self.pin.write(PinLevel::Low);
        if high.is_ok() && low.is_ok() {
            self.pulses += 1;
        } else {
            self.faults += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockOutput;

    #[test]
    fn test_timer_advance() {
        let mut timer = SysTimer::new(1000);
        assert_eq!(timer.now(), 0);
        timer.advance(1500);
        assert_eq!(timer.now(), 1500);
        assert_eq!(timer.now_ms(), 1500);
    }

    #[test]
    fn test_timer_ms_at_slow_rate() {
        let mut timer = SysTimer::new(100);
        timer.advance(25);
        assert_eq!(timer.now_ms(), 250);
    }

    #[test]
    fn test_elapsed_since() {
        let mut timer = SysTimer::new(1000);
        timer.advance(1000);
        let reference = timer.now();
        timer.advance(500);
        assert_eq!(timer.elapsed_since(reference), 500);
        assert_eq!(timer.elapsed_since(5000), 0);
    }

    #[test]
    fn test_deadline_is_anchored_not_relative() {
        let mut pacer = DelayUntil::new(3, 5);
        assert_eq!(pacer.deadline(), 3);
        // Each cycle wakes late by a different amount; deadlines never drift
        let finish_times = [4, 10, 13, 21, 24];
        for (k, now) in finish_times.iter().enumerate() {
            let expected = 3 + (k as u64 + 1) * 5;
            let wake = pacer.advance(*now);
            assert_eq!(pacer.deadline(), expected);
            assert_eq!(wake, Wake::At(expected));
        }
    }

    #[test]
    fn test_overrun_releases_immediately() {
        let mut pacer = DelayUntil::new(0, 5);
        let wake = pacer.advance(7);
        assert_eq!(wake, Wake::Immediate { late_by: 2 });
        assert!(wake.is_overrun());
        assert_eq!(pacer.deadline(), 5);
    }

    #[test]
    fn test_finishing_on_boundary_is_not_overrun() {
        let mut pacer = DelayUntil::new(0, 5);
        let wake = pacer.advance(5);
        assert_eq!(wake, Wake::Immediate { late_by: 0 });
        assert!(!wake.is_overrun());
    }

    #[test]
    fn test_due_and_remaining() {
        let pacer = DelayUntil::new(10, 4);
        assert!(!pacer.is_due(9));
        assert!(pacer.is_due(10));
        assert_eq!(pacer.remaining(7), 3);
        assert_eq!(pacer.remaining(12), 0);
    }

    #[test]
    fn test_heartbeat_pulses_pin() {
        let pin = MockOutput::new();
        let mut beat = Heartbeat::new(&pin);
        beat.on_tick(1);
        beat.on_tick(2);
        assert_eq!(beat.pulses(), 2);
        assert_eq!(pin.rising_edges(), 2);
        assert_eq!(pin.level(), PinLevel::Low);
    }

    #[test]
    fn test_heartbeat_counts_faults() {
        let pin = MockOutput::new();
        pin.fail_writes(true);
        let mut beat = Heartbeat::new(&pin);
        beat.on_tick(1);
        assert_eq!(beat.pulses(), 0);
        assert_eq!(beat.faults(), 1);
    }
}
