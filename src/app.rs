//! Application tasks
//!
//! The fixed task set of the board: two button monitors, a periodic beacon
//! message and a CAN echo responder. Each body samples its peripheral through
//! an injected [`hal`](crate::hal) capability once per cycle and publishes to
//! its own status slot.

use crate::error::Result;
use crate::hal::{CanBus, CanFrame, DigitalInput, HalError, PinLevel, SerialPort};
use crate::kernel::Kernel;
use crate::task::{TaskBody, TaskContext, TaskId, TaskPriority};
use crate::timer::Tick;

/// Console UART speed
pub const BAUD_RATE: u32 = 115_200;

/// CAN identifier answered by [`CanEcho`]
pub const REQUEST_ID: u32 = 0x0001_2345;
/// CAN identifier of the echo reply
pub const REPLY_ID: u32 = 0x0005_4321;

pub const DOOR_PERIOD: Tick = 10;
pub const SPEED_PERIOD: Tick = 5;
pub const LIGHT_PERIOD: Tick = 20;
pub const CAN_PERIOD: Tick = 5;

pub const DOOR_PUSHED: &str = "Button One Pushed | ";
pub const DOOR_RELEASED: &str = "Button One Released | ";
pub const SPEED_PUSHED: &str = " Button Two Pushed |";
pub const SPEED_RELEASED: &str = " Button Two Released |";
pub const BEACON_TEXT: &str = " Periodic_String\n";

/// Bring up the console UART
pub fn init_serial<S: SerialPort>(port: &mut S) -> core::result::Result<(), HalError> {
    port.init(BAUD_RATE)
}

/// Publishes a message whenever a button changes level
///
/// The first cycle always publishes the current level.
pub struct ButtonMonitor<P: DigitalInput> {
    pin: P,
    pushed: &'static str,
    released: &'static str,
    /// Level last published
    latched: Option<PinLevel>,
    cost: Tick,
    publish_failures: u32,
}

impl<P: DigitalInput> ButtonMonitor<P> {
    pub fn new(pin: P, pushed: &'static str, released: &'static str) -> Self {
        Self {
            pin,
            pushed,
            released,
            latched: None,
            cost: 1,
            publish_failures: 0,
        }
    }

    /// CPU ticks charged per cycle
    pub fn with_cost(mut self, cost: Tick) -> Self {
        self.cost = cost;
        self
    }

    pub fn latched(&self) -> Option<PinLevel> {
        self.latched
    }

    /// Status writes that were refused
    pub fn publish_failures(&self) -> u32 {
        self.publish_failures
    }
}

impl<P: DigitalInput> TaskBody for ButtonMonitor<P> {
    fn run(&mut self, cx: &mut TaskContext<'_>) -> Tick {
        let level = self.pin.read();
        if self.latched != Some(level) {
            let text = match level {
                PinLevel::High => self.pushed,
                PinLevel::Low => self.released,
            };
            match cx.set_status(text) {
                Ok(_) => self.latched = Some(level),
                // Not latched: retried next cycle
                Err(_) => self.publish_failures += 1,
            }
        }
        self.cost
    }
}

/// Publishes the same message every cycle
pub struct PeriodicMessage {
    text: &'static str,
    cost: Tick,
    published: u32,
}

impl PeriodicMessage {
    pub fn new(text: &'static str) -> Self {
        Self {
            text,
            cost: 1,
            published: 0,
        }
    }

    pub fn with_cost(mut self, cost: Tick) -> Self {
        self.cost = cost;
        self
    }

    pub fn published(&self) -> u32 {
        self.published
    }
}

impl TaskBody for PeriodicMessage {
    fn run(&mut self, cx: &mut TaskContext<'_>) -> Tick {
        if cx.set_status(self.text).is_ok() {
            self.published += 1;
        }
        self.cost
    }
}

/// Answers [`REQUEST_ID`] frames with a [`REPLY_ID`] frame whose first data
/// word is incremented
pub struct CanEcho<B: CanBus> {
    bus: B,
    cost: Tick,
    received: u32,
    replies: u32,
    push_failures: u32,
}

impl<B: CanBus> CanEcho<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            cost: 1,
            received: 0,
            replies: 0,
            push_failures: 0,
        }
    }

    pub fn with_cost(mut self, cost: Tick) -> Self {
        self.cost = cost;
        self
    }

    /// Frames pulled from the bus
    pub fn received(&self) -> u32 {
        self.received
    }

    pub fn replies(&self) -> u32 {
        self.replies
    }

    pub fn push_failures(&self) -> u32 {
        self.push_failures
    }
}

impl<B: CanBus> TaskBody for CanEcho<B> {
    fn run(&mut self, _cx: &mut TaskContext<'_>) -> Tick {
        // One frame per cycle
        let Some(frame) = self.bus.pull() else {
            return self.cost;
        };
        self.received += 1;

        if frame.id == REQUEST_ID {
            let reply = CanFrame {
                id: REPLY_ID,
                data_a: frame.data_a.wrapping_add(1),
                ..frame
            };
            match self.bus.push(&reply) {
                Ok(()) => self.replies += 1,
                Err(_) => {
                    self.push_failures += 1;
                    log_warn!("can echo reply dropped, {} so far", self.push_failures);
                }
            }
        }
        self.cost
    }
}

/// Bodies of the board's task set
pub struct App<D: DigitalInput, S: DigitalInput, B: CanBus> {
    pub door: ButtonMonitor<D>,
    pub speed: ButtonMonitor<S>,
    pub light: PeriodicMessage,
    pub can: CanEcho<B>,
}

impl<D: DigitalInput, S: DigitalInput, B: CanBus> App<D, S, B> {
    pub fn new(door_pin: D, speed_pin: S, bus: B) -> Self {
        Self {
            door: ButtonMonitor::new(door_pin, DOOR_PUSHED, DOOR_RELEASED),
            speed: ButtonMonitor::new(speed_pin, SPEED_PUSHED, SPEED_RELEASED),
            light: PeriodicMessage::new(BEACON_TEXT),
            can: CanEcho::new(bus),
        }
    }
}

/// Handles of the created task set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppTasks {
    pub door: TaskId,
    pub speed: TaskId,
    pub light: TaskId,
    pub can: TaskId,
}

/// Create the task set; must run before [`Kernel::start`]
pub fn spawn<'a, D, S, B>(kernel: &mut Kernel<'a>, app: &'a mut App<D, S, B>) -> Result<AppTasks>
where
    D: DigitalInput + 'a,
    S: DigitalInput + 'a,
    B: CanBus + 'a,
{
    let door = kernel.create_periodic(&mut app.door, "door_monitor", TaskPriority::NORMAL, DOOR_PERIOD)?;
    let speed = kernel.create_periodic(&mut app.speed, "speed_monitor", TaskPriority::NORMAL, SPEED_PERIOD)?;
    let light = kernel.create_periodic(&mut app.light, "light_beacon", TaskPriority::NORMAL, LIGHT_PERIOD)?;
    let can = kernel.create_periodic(&mut app.can, "can_echo", TaskPriority::NORMAL, CAN_PERIOD)?;
    Ok(AppTasks {
        door,
        speed,
        light,
        can,
    })
}
