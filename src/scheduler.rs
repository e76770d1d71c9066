//! Fixed-priority preemptive scheduler
//!
//! Host model of the underlying kernel: a static task table, release on
//! absolute deadline, preemption by strictly higher priority, and a switch
//! hook fired whenever the running task changes. Time advances in whole
//! ticks; a body's reported cost is charged one tick at a time, so a
//! higher-priority release can preempt a cycle in progress.
//!
//! Equal priorities do not time-slice: the running task keeps the CPU until it
//! blocks, and ready tasks of the same level run in release order.

use heapless::Vec;

use crate::accounting::SwitchHook;
use crate::config::MAX_TASKS;
use crate::error::{Result, RtError};
use crate::status::Board;
use crate::task::{TaskBody, TaskContext, TaskDescriptor, TaskId, TaskPriority, TaskState};
use crate::timer::{Tick, Wake};

/// One task table entry
struct Slot<'a> {
    desc: TaskDescriptor,
    body: &'a mut dyn TaskBody,
    state: TaskState,
    /// Body already ran for the current release
    started: bool,
    /// CPU ticks still owed to the current cycle
    remaining: Tick,
    /// Release sequence number, for FIFO order within a priority
    released_at: u64,
}

/// Preemptive scheduler over a static task table
pub struct Scheduler<'a> {
    tasks: Vec<Slot<'a>, MAX_TASKS>,
    /// Task holding the CPU (None = idle)
    current: Option<usize>,
    release_seq: u64,
    /// Total context switches
    pub context_switches: u32,
}

impl<'a> Scheduler<'a> {
    pub const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            current: None,
            release_seq: 0,
            context_switches: 0,
        }
    }

    /// Create a task whose first release is `start`
    pub fn spawn(
        &mut self,
        body: &'a mut dyn TaskBody,
        name: &str,
        priority: TaskPriority,
        period: Tick,
        start: Tick,
    ) -> Result<TaskId> {
        let id = TaskId::new(self.tasks.len());
        let slot = Slot {
            desc: TaskDescriptor::new(id, name, priority, period, start),
            body,
            state: TaskState::Sleeping,
            started: false,
            remaining: 0,
            released_at: 0,
        };
        self.tasks.push(slot).map_err(|_| RtError::TaskTableFull)?;
        Ok(id)
    }

    /// Move every task's first release to `start`
    pub fn anchor_all(&mut self, start: Tick) {
        for slot in self.tasks.iter_mut() {
            slot.desc.anchor_at(start);
        }
    }

    /// Run one tick `[now, now + 1)`
    ///
    /// Returns the task charged for this tick, or `None` if the CPU idled.
    pub fn tick(&mut self, now: Tick, hook: &dyn SwitchHook, status: &Board) -> Option<TaskId> {
        self.release(now);

        loop {
            let next = self.find_highest_priority_ready();
            self.switch_to(next, now, hook);
            let idx = next?;

            if !self.tasks[idx].started {
                self.dispatch(idx, now, status);
            }

            let slot = &mut self.tasks[idx];
            if slot.remaining == 0 {
                // Zero-cost cycle: reaches its delay-until point within this tick
                self.finish_cycle(idx, now);
                continue;
            }

            slot.remaining -= 1;
            if slot.remaining == 0 {
                self.finish_cycle(idx, now + 1);
            }
            return Some(TaskId::new(idx));
        }
    }

    /// Wake sleeping tasks whose deadline has arrived
    fn release(&mut self, now: Tick) {
        for i in 0..self.tasks.len() {
            if self.tasks[i].state == TaskState::Sleeping && self.tasks[i].desc.is_due(now) {
                self.make_ready(i);
            }
        }
    }

    fn make_ready(&mut self, idx: usize) {
        self.release_seq += 1;
        let slot = &mut self.tasks[idx];
        slot.state = TaskState::Ready;
        slot.started = false;
        slot.released_at = self.release_seq;
    }

    /// Run the body once for the current release
    fn dispatch(&mut self, idx: usize, now: Tick, status: &Board) {
        let mut peers = [0u32; MAX_TASKS];
        for (dst, slot) in peers.iter_mut().zip(self.tasks.iter()) {
            *dst = slot.desc.cycles();
        }
        let count = self.tasks.len();

        let slot = &mut self.tasks[idx];
        slot.desc.begin_cycle();
        let mut cx = TaskContext::new(slot.desc.id(), now, slot.desc.cycles(), status, &peers[..count]);
        slot.remaining = slot.body.run(&mut cx);
        slot.started = true;
    }

    /// Delay-until point: block until the next deadline or re-release at once
    fn finish_cycle(&mut self, idx: usize, at: Tick) {
        match self.tasks[idx].desc.end_cycle(at) {
            Wake::At(_) => {
                let slot = &mut self.tasks[idx];
                slot.state = TaskState::Sleeping;
                slot.started = false;
            }
            Wake::Immediate { .. } => self.make_ready(idx),
        }
    }

    /// Hand the CPU to `next`, firing the switch hook if it changes hands
    fn switch_to(&mut self, next: Option<usize>, now: Tick, hook: &dyn SwitchHook) {
        if let Some(idx) = next {
            self.tasks[idx].state = TaskState::Running;
        }
        if next == self.current {
            return;
        }
        if let Some(prev) = self.current {
            if self.tasks[prev].state == TaskState::Running {
                self.tasks[prev].state = TaskState::Ready;
            }
        }
        hook.on_context_switch(self.current.map(TaskId::new), next.map(TaskId::new), now);
        self.context_switches = self.context_switches.wrapping_add(1);
        self.current = next;
    }

    /// Highest-priority (lowest number) ready task; the running task wins ties
    fn find_highest_priority_ready(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, slot) in self.tasks.iter().enumerate() {
            if !matches!(slot.state, TaskState::Ready | TaskState::Running) {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b) => {
                    let cur = &self.tasks[b];
                    let better = slot.desc.priority() < cur.desc.priority()
                        || (slot.desc.priority() == cur.desc.priority()
                            && Self::runs_before(slot, cur));
                    if better {
                        Some(i)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        best
    }

    fn runs_before(a: &Slot<'_>, b: &Slot<'_>) -> bool {
        match (a.state, b.state) {
            (TaskState::Running, _) => true,
            (_, TaskState::Running) => false,
            _ => a.released_at < b.released_at,
        }
    }

    /// Get task by id
    pub fn get_task(&self, id: TaskId) -> Option<&TaskDescriptor> {
        self.tasks.get(id.index()).map(|s| &s.desc)
    }

    /// State of a task
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(id.index()).map(|s| s.state)
    }

    /// All task descriptors in creation order
    pub fn tasks(&self) -> Tasks<'_, 'a> {
        Tasks {
            inner: self.tasks.iter(),
        }
    }

    /// Number of created tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Task currently holding the CPU
    pub fn current(&self) -> Option<TaskId> {
        self.current.map(TaskId::new)
    }
}

/// Iterator over task descriptors in creation order
pub struct Tasks<'s, 'a> {
    inner: core::slice::Iter<'s, Slot<'a>>,
}

impl<'s, 'a> Iterator for Tasks<'s, 'a> {
    type Item = &'s TaskDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|s| &s.desc)
    }
}

impl Default for Scheduler<'_> {
    fn default() -> Self {
        Self::new()
    }
}
