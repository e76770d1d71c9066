//! Kernel: the runtime context
//!
//! Owns the time source, the task table, execution accounting, the load
//! estimator and the status board, and hands references to them to each
//! component. Tasks are created before [`Kernel::start`]; after that the task
//! set is fixed and the kernel is driven one tick at a time.

use heapless::String;

use crate::accounting::{Accounting, SystemTotals};
use crate::config::{RuntimeConfig, STATUS_CAPACITY};
use crate::error::{Result, RtError};
use crate::load::{LoadEstimator, LoadSample};
use crate::scheduler::{Scheduler, Tasks};
use crate::status::{Board, WriteOutcome};
use crate::task::{TaskBody, TaskDescriptor, TaskId, TaskPriority, TaskState};
use crate::timer::{SysTimer, Tick, TickHook};

/// Periodic task runtime
///
/// Everything is statically sized; a kernel can live in a `static` or on the
/// stack of `main`.
pub struct Kernel<'a> {
    config: RuntimeConfig,
    /// System timer
    timer: SysTimer,
    /// Task table and dispatcher
    scheduler: Scheduler<'a>,
    accounting: Accounting,
    load: LoadEstimator,
    status: Board,
    tick_hook: Option<&'a mut dyn TickHook>,
    /// Set once by [`Kernel::start`]; the kernel never stops
    running: bool,
    /// Tick of the last automatic load sample
    last_sample: Tick,
    /// Ticks driven through [`Kernel::tick`]
    pub total_ticks: u64,
    /// Ticks charged to a task
    pub busy_ticks: u64,
}

impl<'a> Kernel<'a> {
    pub const fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            timer: SysTimer::new(config.tick_rate_hz),
            scheduler: Scheduler::new(),
            accounting: Accounting::new(),
            load: LoadEstimator::new(),
            status: Board::new(),
            tick_hook: None,
            running: false,
            last_sample: 0,
            total_ticks: 0,
            busy_ticks: 0,
        }
    }

    /// Create kernel for testing (default configuration)
    pub const fn testing() -> Self {
        Self::new(RuntimeConfig::DEFAULT)
    }

    /// Register a periodic task
    ///
    /// The first release is the tick the kernel starts at; every following
    /// release is one period after the previous one.
    pub fn create_periodic(
        &mut self,
        body: &'a mut dyn TaskBody,
        name: &str,
        priority: TaskPriority,
        period: Tick,
    ) -> Result<TaskId> {
        if self.running {
            return Err(RtError::AlreadyStarted);
        }
        if period == 0 {
            return Err(RtError::InvalidPeriod);
        }
        if !priority.is_valid(self.config.max_priorities) {
            return Err(RtError::InvalidPriority(priority.0));
        }

        let id = self
            .scheduler
            .spawn(body, name, priority, period, self.timer.now())?;
        log_debug!("created task {} period {} priority {}", name, period, priority.0);
        Ok(id)
    }

    /// Install the per-tick callback
    pub fn set_tick_hook(&mut self, hook: &'a mut dyn TickHook) {
        self.tick_hook = Some(hook);
    }

    /// Validate the configuration and start scheduling
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Err(RtError::AlreadyStarted);
        }
        self.config.validate()?;

        let now = self.timer.now();
        // Ticks that passed before start are not owed to anyone
        self.scheduler.anchor_all(now);
        self.accounting.start(now);
        self.last_sample = now;
        self.running = true;
        log_info!("kernel started with {} tasks at tick {}", self.scheduler.task_count(), now);
        Ok(())
    }

    /// Run one tick
    ///
    /// Returns the task charged for the tick. Before [`Kernel::start`] only
    /// time advances.
    pub fn tick(&mut self) -> Option<TaskId> {
        let now = self.timer.now();
        let executed = if self.running {
            self.scheduler.tick(now, &self.accounting, &self.status)
        } else {
            None
        };

        self.timer.advance(1);
        self.total_ticks += 1;
        if executed.is_some() {
            self.busy_ticks += 1;
        }

        let now = self.timer.now();
        if let Some(hook) = self.tick_hook.as_mut() {
            hook.on_tick(now);
        }

        let period = self.config.load_sample_period;
        if self.running && period > 0 && now - self.last_sample >= period {
            self.last_sample = now;
            // Rejected windows show up in `Diagnostics::load_anomalies`
            let _ = self.sample_load();
        }

        executed
    }

    /// Run the kernel for `ticks` ticks, starting it if needed
    pub fn run_for(&mut self, ticks: Tick) -> Result<KernelStats> {
        if !self.running {
            self.start()?;
        }

        let start_busy = self.busy_ticks;
        let start_switches = self.scheduler.context_switches;
        let start_cycles = self.total_cycles();

        for _ in 0..ticks {
            self.tick();
        }

        let busy_ticks = self.busy_ticks - start_busy;
        Ok(KernelStats {
            ticks,
            busy_ticks,
            idle_ticks: ticks - busy_ticks,
            context_switches: self.scheduler.context_switches.wrapping_sub(start_switches),
            cycles_executed: self.total_cycles() - start_cycles,
            load: self.load.latest(),
        })
    }

    /// Has the kernel been started?
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Sample CPU load now
    pub fn sample_load(&mut self) -> Result<LoadSample> {
        let totals = self.accounting.totals(self.timer.now());
        Ok(self.load.sample_load(totals)?)
    }

    /// Latest valid load reading
    pub fn cpu_load(&self) -> LoadSample {
        self.load.latest()
    }

    /// Elapsed, busy and idle ticks since start
    pub fn totals(&self) -> SystemTotals {
        self.accounting.totals(self.timer.now())
    }

    pub fn set_status(&self, id: TaskId, text: &str) -> Result<WriteOutcome> {
        Ok(self.status.set_status(id, text)?)
    }

    pub fn get_status(&self, id: TaskId) -> Result<String<STATUS_CAPACITY>> {
        Ok(self.status.get_status(id)?)
    }

    /// Status board shared with the monitor
    pub fn status(&self) -> &Board {
        &self.status
    }

    pub fn task(&self, id: TaskId) -> Result<&TaskDescriptor> {
        self.scheduler
            .get_task(id)
            .ok_or(RtError::UnknownTask(id.index()))
    }

    pub fn task_state(&self, id: TaskId) -> Result<TaskState> {
        self.scheduler
            .state(id)
            .ok_or(RtError::UnknownTask(id.index()))
    }

    /// All tasks in creation order
    pub fn tasks(&self) -> Tasks<'_, 'a> {
        self.scheduler.tasks()
    }

    pub fn task_count(&self) -> usize {
        self.scheduler.task_count()
    }

    pub fn accounting(&self) -> &Accounting {
        &self.accounting
    }

    pub fn load(&self) -> &LoadEstimator {
        &self.load
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Current tick
    pub fn now(&self) -> Tick {
        self.timer.now()
    }

    pub fn timer(&self) -> &SysTimer {
        &self.timer
    }

    /// Steady-state anomaly counters
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            overruns: self.tasks().map(|t| t.overruns()).sum(),
            status_truncations: self.status.truncations(),
            status_rejections: self.status.rejected(),
            load_anomalies: self.load.anomalies(),
            load_unavailable: self.load.unavailable(),
        }
    }

    fn total_cycles(&self) -> u64 {
        self.tasks().map(|t| t.cycles() as u64).sum()
    }
}

/// Kernel execution statistics for one [`Kernel::run_for`] window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KernelStats {
    /// Ticks run
    pub ticks: Tick,
    /// Ticks charged to a task
    pub busy_ticks: Tick,
    /// Ticks spent idle
    pub idle_ticks: Tick,
    /// Context switches
    pub context_switches: u32,
    /// Task cycles started
    pub cycles_executed: u64,
    /// Latest load reading at the end of the window
    pub load: LoadSample,
}

/// Counters for anomalies the kernel records and survives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Diagnostics {
    /// Period overruns across all tasks
    pub overruns: u32,
    /// Status writes cut at slot capacity
    pub status_truncations: u32,
    /// Status writes refused
    pub status_rejections: u32,
    /// Load samples rejected for inconsistent accounting
    pub load_anomalies: u32,
    /// Load samples with no elapsed time
    pub load_unavailable: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockOutput;
    use crate::task::TaskContext;
    use crate::timer::Heartbeat;

    fn cost(ticks: Tick) -> impl FnMut(&mut TaskContext<'_>) -> Tick {
        move |_cx: &mut TaskContext<'_>| ticks
    }

    #[test]
    fn test_kernel_creation() {
        let kernel = Kernel::testing();
        assert_eq!(kernel.task_count(), 0);
        assert!(!kernel.is_running());
        assert_eq!(kernel.now(), 0);
    }

    #[test]
    fn test_kernel_create_periodic() {
        let mut body = cost(1);
        let mut kernel = Kernel::testing();
        let id = kernel
            .create_periodic(&mut body, "door_monitor", TaskPriority::NORMAL, 10)
            .unwrap();
        assert_eq!(id, TaskId::new(0));
        assert_eq!(kernel.task(id).unwrap().name(), "door_monitor");
        assert_eq!(kernel.task(id).unwrap().tag(), 1);
    }

    #[test]
    fn test_create_rejects_bad_arguments() {
        let mut a = cost(1);
        let mut b = cost(1);
        let mut kernel = Kernel::testing();
        assert_eq!(
            kernel.create_periodic(&mut a, "zero", TaskPriority::NORMAL, 0),
            Err(RtError::InvalidPeriod)
        );
        assert_eq!(
            kernel.create_periodic(&mut b, "prio", TaskPriority(5), 10),
            Err(RtError::InvalidPriority(5))
        );
        assert_eq!(kernel.task_count(), 0);
    }

    #[test]
    fn test_create_after_start_rejected() {
        let mut body = cost(1);
        let mut kernel = Kernel::testing();
        kernel.start().unwrap();
        assert_eq!(
            kernel.create_periodic(&mut body, "late", TaskPriority::NORMAL, 10),
            Err(RtError::AlreadyStarted)
        );
        assert_eq!(kernel.start(), Err(RtError::AlreadyStarted));
    }

    #[test]
    fn test_start_validates_config() {
        let mut kernel = Kernel::new(RuntimeConfig::DEFAULT.with_tick_rate(0));
        assert_eq!(kernel.start(), Err(RtError::InvalidConfig));
        assert!(!kernel.is_running());
    }

    #[test]
    fn test_tick_before_start_only_advances_time() {
        let mut body = cost(1);
        let mut kernel = Kernel::testing();
        let id = kernel
            .create_periodic(&mut body, "t", TaskPriority::NORMAL, 10)
            .unwrap();
        assert_eq!(kernel.tick(), None);
        assert_eq!(kernel.now(), 1);
        assert_eq!(kernel.task(id).unwrap().cycles(), 0);
    }

    #[test]
    fn test_ticks_before_start_owe_no_cycles() {
        let mut body = cost(1);
        let mut kernel = Kernel::testing();
        let id = kernel
            .create_periodic(&mut body, "t", TaskPriority::NORMAL, 5)
            .unwrap();
        for _ in 0..20 {
            kernel.tick();
        }
        kernel.run_for(10).unwrap();

        let task = kernel.task(id).unwrap();
        assert_eq!(task.start(), 20);
        assert_eq!(task.cycles(), 2);
        assert_eq!(task.overruns(), 0);
        assert_eq!(task.worst_lateness(), 0);
    }

    #[test]
    fn test_started_kernel_stays_started() {
        let mut long = cost(100);
        let mut late = cost(1);
        let mut kernel = Kernel::testing();
        kernel
            .create_periodic(&mut long, "long", TaskPriority::NORMAL, 200)
            .unwrap();
        kernel.run_for(10).unwrap();
        for _ in 0..50 {
            kernel.tick();
        }

        assert!(kernel.is_running());
        assert_eq!(
            kernel.create_periodic(&mut late, "late", TaskPriority::NORMAL, 10),
            Err(RtError::AlreadyStarted)
        );
        assert_eq!(kernel.start(), Err(RtError::AlreadyStarted));
        assert_eq!(kernel.task_count(), 1);

        let totals = kernel.totals();
        assert_eq!(totals.elapsed, 60);
        assert_eq!(totals.busy, 60);
        assert!(totals.busy <= totals.elapsed);
    }

    #[test]
    fn test_kernel_run_for() {
        let mut fast = cost(1);
        let mut slow = cost(2);
        let mut kernel = Kernel::testing();
        kernel
            .create_periodic(&mut fast, "fast", TaskPriority::HIGH, 5)
            .unwrap();
        kernel
            .create_periodic(&mut slow, "slow", TaskPriority::LOW, 10)
            .unwrap();

        let stats = kernel.run_for(100).unwrap();
        assert_eq!(stats.ticks, 100);
        assert_eq!(stats.cycles_executed, 20 + 10);
        assert_eq!(stats.busy_ticks, 20 + 20);
        assert_eq!(stats.idle_ticks, 60);
        assert_eq!(kernel.totals().busy, stats.busy_ticks);
    }

    #[test]
    fn test_busy_accounting_matches_charged_ticks() {
        let mut a = cost(3);
        let mut b = cost(2);
        let mut kernel = Kernel::testing();
        let a_id = kernel.create_periodic(&mut a, "a", TaskPriority::HIGH, 7).unwrap();
        let b_id = kernel.create_periodic(&mut b, "b", TaskPriority::LOW, 4).unwrap();
        kernel.run_for(57).unwrap();

        let now = kernel.now();
        let busy_a = kernel.accounting().busy(a_id, now);
        let busy_b = kernel.accounting().busy(b_id, now);
        assert_eq!(busy_a + busy_b, kernel.busy_ticks);
        assert!(kernel.totals().busy <= kernel.totals().elapsed);
    }

    #[test]
    fn test_auto_load_sample() {
        let mut body = cost(1);
        let config = RuntimeConfig::DEFAULT.with_load_sample_period(100);
        let mut kernel = Kernel::new(config);
        kernel
            .create_periodic(&mut body, "quarter", TaskPriority::NORMAL, 4)
            .unwrap();
        assert_eq!(kernel.cpu_load(), LoadSample::Unavailable);

        let stats = kernel.run_for(100).unwrap();
        assert_eq!(stats.load, LoadSample::Percent(25.0));
        assert_eq!(kernel.load().samples(), 1);
    }

    #[test]
    fn test_sample_load_twice_same_tick() {
        let mut kernel = Kernel::new(RuntimeConfig::DEFAULT.with_load_sample_period(0));
        kernel.run_for(10).unwrap();
        assert_eq!(kernel.sample_load(), Ok(LoadSample::Percent(0.0)));
        assert_eq!(kernel.sample_load(), Ok(LoadSample::Unavailable));
        assert_eq!(kernel.diagnostics().load_unavailable, 1);
    }

    #[test]
    fn test_tick_hook_heartbeat() {
        let pin = MockOutput::new();
        let mut beat = Heartbeat::new(&pin);
        let mut kernel = Kernel::testing();
        kernel.set_tick_hook(&mut beat);
        kernel.run_for(10).unwrap();
        drop(kernel);
        assert_eq!(beat.pulses(), 10);
        assert_eq!(pin.rising_edges(), 10);
    }

    #[test]
    fn test_status_through_kernel() {
        let kernel = Kernel::testing();
        kernel.set_status(TaskId::new(1), "speed").unwrap();
        assert_eq!(kernel.get_status(TaskId::new(1)).unwrap().as_str(), "speed");
        assert_eq!(
            kernel.get_status(TaskId::new(10)),
            Err(RtError::Status(crate::error::StatusError::NoSuchSlot))
        );
    }

    #[test]
    fn test_unknown_task() {
        let kernel = Kernel::testing();
        assert!(matches!(kernel.task(TaskId::new(3)), Err(RtError::UnknownTask(3))));
    }

    #[test]
    fn test_overrun_in_diagnostics() {
        let mut slow = cost(7);
        let mut kernel = Kernel::testing();
        kernel
            .create_periodic(&mut slow, "slow", TaskPriority::NORMAL, 5)
            .unwrap();
        kernel.run_for(20).unwrap();
        assert!(kernel.diagnostics().overruns >= 1);
    }
}
