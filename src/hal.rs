//! Peripheral capabilities consumed by task bodies
//!
//! Task bodies poll hardware through these traits rather than touching
//! registers, so the scheduling and accounting core runs unchanged on the host
//! against [`mock`] peripherals.

use core::fmt;

/// Logic level of a digital pin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinLevel {
    Low,
    High,
}

/// Peripheral errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HalError {
    /// Transmit path full
    Busy,
    /// Controller left the bus after too many errors
    BusOff,
    /// Peripheral rejected the requested configuration
    InvalidConfig,
    /// Pin or peripheral fault
    Fault,
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HalError::Busy => write!(f, "peripheral busy"),
            HalError::BusOff => write!(f, "bus off"),
            HalError::InvalidConfig => write!(f, "invalid peripheral configuration"),
            HalError::Fault => write!(f, "peripheral fault"),
        }
    }
}

/// Level-read of a digital input pin
pub trait DigitalInput {
    fn read(&self) -> PinLevel;

    fn is_high(&self) -> bool {
        self.read() == PinLevel::High
    }
}

/// Level-write of a digital output pin
pub trait DigitalOutput {
    fn write(&mut self, level: PinLevel) -> Result<(), HalError>;
}

/// CAN frame record: identifier, data length and two 32-bit data words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    /// 11-bit or 29-bit identifier
    pub id: u32,
    /// Data length code (0..=8)
    pub dlc: u8,
    /// 29-bit identifier format
    pub extended: bool,
    /// Data bytes 0..4
    pub data_a: u32,
    /// Data bytes 4..8
    pub data_b: u32,
}

impl CanFrame {
    /// Extended-id frame carrying all eight data bytes
    pub const fn extended(id: u32, data_a: u32, data_b: u32) -> Self {
        Self {
            id,
            dlc: 8,
            extended: true,
            data_a,
            data_b,
        }
    }
}

/// CAN controller: non-blocking receive and transmit
pub trait CanBus {
    /// Take one received frame, if any
    fn pull(&mut self) -> Option<CanFrame>;

    /// Queue a frame for transmission
    fn push(&mut self, frame: &CanFrame) -> Result<(), HalError>;
}

/// UART bring-up
pub trait SerialPort {
    fn init(&mut self, baud: u32) -> Result<(), HalError>;
}

impl<T: DigitalInput + ?Sized> DigitalInput for &T {
    fn read(&self) -> PinLevel {
        (**self).read()
    }
}

impl<T: DigitalOutput + ?Sized> DigitalOutput for &mut T {
    fn write(&mut self, level: PinLevel) -> Result<(), HalError> {
        (**self).write(level)
    }
}

impl<T: CanBus + ?Sized> CanBus for &mut T {
    fn pull(&mut self) -> Option<CanFrame> {
        (**self).pull()
    }

    fn push(&mut self, frame: &CanFrame) -> Result<(), HalError> {
        (**self).push(frame)
    }
}

/// Host peripherals with test-visible state
///
/// State sits behind `Cell`/`RefCell` so a test can keep a shared reference
/// to a peripheral while a task body drives it.
pub mod mock {
    use core::cell::{Cell, RefCell};

    use heapless::{Deque, Vec};

    use super::{CanBus, CanFrame, DigitalInput, DigitalOutput, HalError, PinLevel, SerialPort};

    /// Frames a [`MockCan`] can hold in each direction
    pub const MOCK_CAN_DEPTH: usize = 16;

    /// Input pin whose level the test sets
    #[derive(Debug)]
    pub struct MockInput {
        level: Cell<PinLevel>,
        reads: Cell<u32>,
    }

    impl MockInput {
        pub const fn new(level: PinLevel) -> Self {
            Self {
                level: Cell::new(level),
                reads: Cell::new(0),
            }
        }

        pub fn set(&self, level: PinLevel) {
            self.level.set(level);
        }

        /// Times the pin was sampled
        pub fn reads(&self) -> u32 {
            self.reads.get()
        }
    }

    impl DigitalInput for MockInput {
        fn read(&self) -> PinLevel {
            self.reads.set(self.reads.get() + 1);
            self.level.get()
        }
    }

    /// Output pin recording its level and rising edges
    #[derive(Debug)]
    pub struct MockOutput {
        level: Cell<PinLevel>,
        rising_edges: Cell<u64>,
        fail: Cell<bool>,
    }

    impl MockOutput {
        pub const fn new() -> Self {
            Self {
                level: Cell::new(PinLevel::Low),
                rising_edges: Cell::new(0),
                fail: Cell::new(false),
            }
        }

        pub fn level(&self) -> PinLevel {
            self.level.get()
        }

        pub fn rising_edges(&self) -> u64 {
            self.rising_edges.get()
        }

        /// Make subsequent writes fail with [`HalError::Fault`]
        pub fn fail_writes(&self, fail: bool) {
            self.fail.set(fail);
        }

        fn drive(&self, level: PinLevel) -> Result<(), HalError> {
            if self.fail.get() {
                return Err(HalError::Fault);
            }
            if self.level.get() == PinLevel::Low && level == PinLevel::High {
                self.rising_edges.set(self.rising_edges.get() + 1);
            }
            self.level.set(level);
            Ok(())
        }
    }

    impl Default for MockOutput {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DigitalOutput for MockOutput {
        fn write(&mut self, level: PinLevel) -> Result<(), HalError> {
            self.drive(level)
        }
    }

    impl DigitalOutput for &MockOutput {
        fn write(&mut self, level: PinLevel) -> Result<(), HalError> {
            self.drive(level)
        }
    }

    /// CAN controller with an injectable receive queue and a captured transmit log
    #[derive(Debug, Default)]
    pub struct MockCan {
        rx: RefCell<Deque<CanFrame, MOCK_CAN_DEPTH>>,
        tx: RefCell<Vec<CanFrame, MOCK_CAN_DEPTH>>,
    }

    impl MockCan {
        pub fn new() -> Self {
            Self::default()
        }

        /// Deliver a frame to the receive queue; false if the queue is full
        pub fn deliver(&self, frame: CanFrame) -> bool {
            self.rx.borrow_mut().push_back(frame).is_ok()
        }

        /// Frames transmitted so far
        pub fn sent(&self) -> Vec<CanFrame, MOCK_CAN_DEPTH> {
            self.tx.borrow().clone()
        }

        fn take(&self) -> Option<CanFrame> {
            self.rx.borrow_mut().pop_front()
        }

        fn send(&self, frame: &CanFrame) -> Result<(), HalError> {
            self.tx.borrow_mut().push(*frame).map_err(|_| HalError::Busy)
        }
    }

    impl CanBus for MockCan {
        fn pull(&mut self) -> Option<CanFrame> {
            self.take()
        }

        fn push(&mut self, frame: &CanFrame) -> Result<(), HalError> {
            self.send(frame)
        }
    }

    impl CanBus for &MockCan {
        fn pull(&mut self) -> Option<CanFrame> {
            self.take()
        }

        fn push(&mut self, frame: &CanFrame) -> Result<(), HalError> {
            self.send(frame)
        }
    }

    /// UART that records the configured baud rate
    #[derive(Debug, Default)]
    pub struct MockSerial {
        pub baud: Option<u32>,
    }

    impl SerialPort for MockSerial {
        fn init(&mut self, baud: u32) -> Result<(), HalError> {
            if baud == 0 {
                return Err(HalError::InvalidConfig);
            }
            self.baud = Some(baud);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;

    #[test]
    fn test_input_through_reference() {
        let pin = MockInput::new(PinLevel::Low);
        let by_ref = &pin;
        assert!(!by_ref.is_high());
        pin.set(PinLevel::High);
        assert!(by_ref.is_high());
        assert_eq!(pin.reads(), 2);
    }

    #[test]
    fn test_output_edges() {
        let pin = MockOutput::new();
        let mut handle = &pin;
        handle.write(PinLevel::High).unwrap();
        handle.write(PinLevel::High).unwrap();
        handle.write(PinLevel::Low).unwrap();
        handle.write(PinLevel::High).unwrap();
        assert_eq!(pin.rising_edges(), 2);
    }

    #[test]
    fn test_can_loopback() {
        let can = MockCan::new();
        let mut bus = &can;
        assert!(bus.pull().is_none());
        assert!(can.deliver(CanFrame::extended(0x123, 1, 2)));
        let frame = bus.pull().unwrap();
        assert_eq!(frame.id, 0x123);
        assert_eq!(frame.dlc, 8);
        bus.push(&frame).unwrap();
        assert_eq!(can.sent().len(), 1);
    }

    #[test]
    fn test_serial_rejects_zero_baud() {
        let mut uart = MockSerial::default();
        assert_eq!(uart.init(0), Err(HalError::InvalidConfig));
        uart.init(115_200).unwrap();
        assert_eq!(uart.baud, Some(115_200));
    }
}
