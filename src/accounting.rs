//! Execution accounting
//!
//! Per-task busy time sampled from the kernel's context-switch hook. The
//! ledger is only mutated inside the hook, which runs in a critical section,
//! so task bodies never touch their own record and no further lock is needed.
//! Idle time is not measured directly: it is whatever part of the elapsed
//! time no task was in service.

use core::cell::RefCell;

use critical_section::Mutex;

use crate::config::MAX_TASKS;
use crate::task::TaskId;
use crate::timer::Tick;

/// Scheduler-level hook fired on every context switch
///
/// `None` stands for the idle task.
pub trait SwitchHook {
    fn on_context_switch(&self, outgoing: Option<TaskId>, incoming: Option<TaskId>, now: Tick);
}

/// Busy-time record for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AccountingRecord {
    /// Tick of the last switch-in
    pub entry: Tick,
    /// Tick of the last switch-out
    pub exit: Tick,
    /// Completed in-service time
    pub busy: Tick,
    /// Switched in and not yet out
    pub in_service: bool,
    /// Switch-ins observed
    pub activations: u32,
}

impl AccountingRecord {
    /// Busy time including the open interval, if the task is in service at `now`
    pub fn busy_at(&self, now: Tick) -> Tick {
        if self.in_service {
            self.busy + now.saturating_sub(self.entry)
        } else {
            self.busy
        }
    }
}

/// Elapsed, busy and idle ticks since accounting started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemTotals {
    pub elapsed: Tick,
    pub busy: Tick,
    pub idle: Tick,
}

struct Ledger {
    records: [AccountingRecord; MAX_TASKS],
    start: Tick,
    switches: u32,
}

/// Accounting table, one record per task slot
pub struct Accounting {
    ledger: Mutex<RefCell<Ledger>>,
}

impl Accounting {
    pub const fn new() -> Self {
        Self {
            ledger: Mutex::new(RefCell::new(Ledger {
                records: [AccountingRecord {
                    entry: 0,
                    exit: 0,
                    busy: 0,
                    in_service: false,
                    activations: 0,
                }; MAX_TASKS],
                start: 0,
                switches: 0,
            })),
        }
    }

    /// Set the elapsed-time baseline
    pub fn start(&self, now: Tick) {
        critical_section::with(|cs| {
            self.ledger.borrow_ref_mut(cs).start = now;
        });
    }

    /// Snapshot of one task's record
    pub fn record(&self, id: TaskId) -> Option<AccountingRecord> {
        critical_section::with(|cs| self.ledger.borrow_ref(cs).records.get(id.index()).copied())
    }

    /// Busy ticks of one task up to `now`
    pub fn busy(&self, id: TaskId, now: Tick) -> Tick {
        self.record(id).map(|r| r.busy_at(now)).unwrap_or(0)
    }

    /// Context switches observed
    pub fn switches(&self) -> u32 {
        critical_section::with(|cs| self.ledger.borrow_ref(cs).switches)
    }

    /// System-wide totals at `now`
    pub fn totals(&self, now: Tick) -> SystemTotals {
        critical_section::with(|cs| {
            let ledger = self.ledger.borrow_ref(cs);
            let elapsed = now.saturating_sub(ledger.start);
            let busy: Tick = ledger.records.iter().map(|r| r.busy_at(now)).sum();
            SystemTotals {
                elapsed,
                busy,
                // Saturates on an accounting fault; the load estimator
                // checks busy against elapsed
                idle: elapsed.saturating_sub(busy),
            }
        })
    }
}

impl Default for Accounting {
    fn default() -> Self {
        Self::new()
    }
}

impl SwitchHook for Accounting {
    fn on_context_switch(&self, outgoing: Option<TaskId>, incoming: Option<TaskId>, now: Tick) {
        critical_section::with(|cs| {
            let mut ledger = self.ledger.borrow_ref_mut(cs);
            ledger.switches = ledger.switches.wrapping_add(1);

            if let Some(id) = outgoing {
                if let Some(rec) = ledger.records.get_mut(id.index()) {
                    rec.exit = now;
                    // No switch-in seen yet: nothing to accumulate
                    if rec.in_service {
                        rec.busy += now.saturating_sub(rec.entry);
                        rec.in_service = false;
                    }
                }
            }

            if let Some(id) = incoming {
                if let Some(rec) = ledger.records.get_mut(id.index()) {
                    rec.entry = now;
                    rec.in_service = true;
                    rec.activations = rec.activations.wrapping_add(1);
                }
            }
        });
    }
}
