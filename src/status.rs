//! Shared status board
//!
//! One fixed-capacity text slot per monitored task. The owning task overwrites
//! its slot each time it has something new to say; a monitor reads slots at
//! its own pace. Reads are non-consuming: the same text is returned until the
//! writer replaces it.
//!
//! Each slot is a sequence-numbered publication cell. The writer makes the
//! sequence odd, stores bytes and length, then makes it even again. A reader
//! copies the slot and accepts the copy only if the sequence was even and
//! unchanged across the copy, so a reader preempting a writer (or the other
//! way round) never observes a torn message. Every store is bounded by the
//! slot capacity.

use core::sync::atomic::{fence, AtomicU32, AtomicU8, AtomicUsize, Ordering};

use heapless::String;

use crate::config::{STATUS_CAPACITY, STATUS_SLOTS};
use crate::error::StatusError;
use crate::task::TaskId;

/// Read attempts before a reader reports [`StatusError::Contended`]
const READ_RETRIES: usize = 8;

/// Result of a bounded write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOutcome {
    /// Whole text stored
    Complete,
    /// Text cut at the slot capacity
    Truncated {
        /// Bytes that did not fit
        dropped: usize,
    },
}

/// Longest prefix of `text` that fits in `capacity` bytes without splitting a
/// UTF-8 sequence, plus the number of bytes left out
pub fn bounded_prefix(text: &str, capacity: usize) -> (&str, usize) {
    if text.len() <= capacity {
        return (text, 0);
    }
    let mut end = capacity;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    (&text[..end], text.len() - end)
}

/// Single-writer, single-reader text slot
pub struct StatusSlot<const CAP: usize> {
    /// Odd while a write is in progress
    seq: AtomicU32,
    len: AtomicUsize,
    bytes: [AtomicU8; CAP],
    truncations: AtomicU32,
}

impl<const CAP: usize> StatusSlot<CAP> {
    pub const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
            len: AtomicUsize::new(0),
            bytes: [const { AtomicU8::new(0) }; CAP],
            truncations: AtomicU32::new(0),
        }
    }

    /// Slot capacity in bytes
    pub const fn capacity(&self) -> usize {
        CAP
    }

    /// Overwrite the slot, truncating at capacity
    pub fn write(&self, text: &str) -> Result<WriteOutcome, StatusError> {
        let (kept, dropped) = bounded_prefix(text, CAP);

        let seq = self.seq.load(Ordering::Relaxed);
        if seq & 1 == 1 {
            return Err(StatusError::WriterBusy);
        }
        self.seq
            .compare_exchange(seq, seq.wrapping_add(1), Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| StatusError::WriterBusy)?;
        fence(Ordering::Release);

        for (cell, byte) in self.bytes.iter().zip(kept.bytes()) {
            cell.store(byte, Ordering::Relaxed);
        }
        self.len.store(kept.len(), Ordering::Relaxed);

        self.seq.store(seq.wrapping_add(2), Ordering::Release);

        if dropped > 0 {
            self.truncations.fetch_add(1, Ordering::Relaxed);
            Ok(WriteOutcome::Truncated { dropped })
        } else {
            Ok(WriteOutcome::Complete)
        }
    }

    /// Copy out the current text
    pub fn read(&self) -> Result<String<CAP>, StatusError> {
        let mut buf = [0u8; CAP];
        for _ in 0..READ_RETRIES {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 1 {
                core::hint::spin_loop();
                continue;
            }

            let len = self.len.load(Ordering::Relaxed).min(CAP);
            for (dst, cell) in buf.iter_mut().zip(self.bytes.iter()).take(len) {
                *dst = cell.load(Ordering::Relaxed);
            }

            fence(Ordering::Acquire);
            if self.seq.load(Ordering::Relaxed) != before {
                continue;
            }

            // A consistent copy is always a prefix cut on a char boundary
            let text = core::str::from_utf8(&buf[..len]).map_err(|_| StatusError::Contended)?;
            let mut out = String::new();
            out.push_str(text).map_err(|_| StatusError::Contended)?;
            return Ok(out);
        }
        Err(StatusError::Contended)
    }

    /// Number of writes that had to be truncated
    pub fn truncations(&self) -> u32 {
        self.truncations.load(Ordering::Relaxed)
    }

    /// Number of completed writes
    pub fn version(&self) -> u32 {
        self.seq.load(Ordering::Acquire) / 2
    }
}

impl<const CAP: usize> Default for StatusSlot<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed set of status slots indexed by task
pub struct StatusBoard<const SLOTS: usize, const CAP: usize> {
    slots: [StatusSlot<CAP>; SLOTS],
    rejected: AtomicU32,
}

impl<const SLOTS: usize, const CAP: usize> StatusBoard<SLOTS, CAP> {
    pub const fn new() -> Self {
        Self {
            slots: [const { StatusSlot::new() }; SLOTS],
            rejected: AtomicU32::new(0),
        }
    }

    /// Overwrite the slot belonging to `task`
    pub fn set_status(&self, task: TaskId, text: &str) -> Result<WriteOutcome, StatusError> {
        let outcome = self.slot(task).and_then(|slot| slot.write(text));
        match outcome {
            Ok(WriteOutcome::Truncated { dropped }) => {
                log_debug!("status slot {} truncated, {} bytes dropped", task.index(), dropped);
            }
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
            Ok(WriteOutcome::Complete) => {}
        }
        outcome
    }

    /// Current text of the slot belonging to `task`
    pub fn get_status(&self, task: TaskId) -> Result<String<CAP>, StatusError> {
        self.slot(task)?.read()
    }

    pub fn slot(&self, task: TaskId) -> Result<&StatusSlot<CAP>, StatusError> {
        self.slots.get(task.index()).ok_or(StatusError::NoSuchSlot)
    }

    /// Truncated writes across all slots
    pub fn truncations(&self) -> u32 {
        self.slots.iter().map(|s| s.truncations()).sum()
    }

    /// Writes refused (slot busy or missing)
    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub const fn slot_count(&self) -> usize {
        SLOTS
    }
}

impl<const SLOTS: usize, const CAP: usize> Default for StatusBoard<SLOTS, CAP> {
    fn default() -> Self {
        Self::new()
    }
}

/// Board sized by the runtime configuration
pub type Board = StatusBoard<STATUS_SLOTS, STATUS_CAPACITY>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_prefix_fits() {
        assert_eq!(bounded_prefix("door", 22), ("door", 0));
        assert_eq!(bounded_prefix("", 0), ("", 0));
    }

    #[test]
    fn test_bounded_prefix_cuts_on_char_boundary() {
        // "é" is two bytes; cutting at 2 would split it
        let (kept, dropped) = bounded_prefix("aé", 2);
        assert_eq!(kept, "a");
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_write_read_identical() {
        let slot = StatusSlot::<22>::new();
        let text = "Button One Released | ";
        assert_eq!(text.len(), 22);
        assert_eq!(slot.write(text), Ok(WriteOutcome::Complete));
        assert_eq!(slot.read().unwrap().as_str(), text);
    }

    #[test]
    fn test_overwrite_not_append() {
        let slot = StatusSlot::<22>::new();
        slot.write("Button One Released | ").unwrap();
        slot.write("Pushed").unwrap();
        assert_eq!(slot.read().unwrap().as_str(), "Pushed");
        assert_eq!(slot.version(), 2);
    }

    #[test]
    fn test_read_is_not_consuming() {
        let slot = StatusSlot::<8>::new();
        slot.write("level").unwrap();
        assert_eq!(slot.read().unwrap().as_str(), "level");
        assert_eq!(slot.read().unwrap().as_str(), "level");
    }

    #[test]
    fn test_empty_slot_reads_empty() {
        let slot = StatusSlot::<8>::new();
        assert_eq!(slot.read().unwrap().as_str(), "");
        assert_eq!(slot.version(), 0);
    }

    #[test]
    fn test_truncation_reported() {
        let slot = StatusSlot::<4>::new();
        assert_eq!(slot.write("abcdef"), Ok(WriteOutcome::Truncated { dropped: 2 }));
        assert_eq!(slot.read().unwrap().as_str(), "abcd");
        assert_eq!(slot.truncations(), 1);
    }

    #[test]
    fn test_writer_in_progress_blocks_second_writer() {
        let slot = StatusSlot::<8>::new();
        // Simulate a writer preempted mid-publication
        slot.seq.store(1, Ordering::Relaxed);
        assert_eq!(slot.write("x"), Err(StatusError::WriterBusy));
        assert_eq!(slot.read(), Err(StatusError::Contended));
        slot.seq.store(2, Ordering::Relaxed);
        assert!(slot.write("x").is_ok());
    }

    #[test]
    fn test_concurrent_reader_never_sees_torn_text() {
        use std::sync::atomic::AtomicBool;

        const A: &str = "AAAAAAAAAAAAAAAAAAAAAA";
        const B: &str = "bbbbbbbbbbbbbbbbbbbbbb";
        const WRITES: u32 = 20_000;

        let slot = StatusSlot::<22>::new();
        let done = AtomicBool::new(false);

        let (consistent, contended) = std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..WRITES {
                    let text = if i % 2 == 0 { A } else { B };
                    assert_eq!(slot.write(text), Ok(WriteOutcome::Complete));
                }
                done.store(true, Ordering::Release);
            });

            let mut consistent = 0u32;
            let mut contended = 0u32;
            loop {
                let finished = done.load(Ordering::Acquire);
                match slot.read() {
                    Ok(text) => {
                        let text = text.as_str();
                        assert!(text.is_empty() || text == A || text == B, "torn read {text:?}");
                        consistent += 1;
                    }
                    Err(StatusError::Contended) => contended += 1,
                    Err(other) => panic!("unexpected {other:?}"),
                }
                if finished {
                    break;
                }
            }
            (consistent, contended)
        });

        assert!(consistent + contended > 0);
        assert_eq!(slot.version(), WRITES);
        assert_eq!(slot.read().unwrap().as_str(), B);
    }

    #[test]
    fn test_board_unknown_slot() {
        let board = StatusBoard::<2, 8>::new();
        assert_eq!(board.set_status(TaskId::new(2), "x"), Err(StatusError::NoSuchSlot));
        assert_eq!(board.get_status(TaskId::new(5)), Err(StatusError::NoSuchSlot));
        assert_eq!(board.rejected(), 1);
    }

    #[test]
    fn test_overflow_leaves_neighbours_intact() {
        let board = StatusBoard::<3, 22>::new();
        board.set_status(TaskId::new(0), "left").unwrap();
        board.set_status(TaskId::new(2), "right").unwrap();

        let long = "0123456789012345678901234"; // 25 bytes
        let outcome = board.set_status(TaskId::new(1), long).unwrap();
        assert_eq!(outcome, WriteOutcome::Truncated { dropped: 3 });

        assert_eq!(board.get_status(TaskId::new(0)).unwrap().as_str(), "left");
        assert_eq!(board.get_status(TaskId::new(1)).unwrap().as_str(), &long[..22]);
        assert_eq!(board.get_status(TaskId::new(2)).unwrap().as_str(), "right");
        assert_eq!(board.truncations(), 1);
    }
}
