//! CPU load estimator
//!
//! Sampled at a coarse period, well above the fastest task period:
//!
//! `load = 100 * (elapsed_delta - idle_delta) / elapsed_delta`
//!
//! where both deltas are taken against the previous sample. A zero elapsed
//! delta yields [`LoadSample::Unavailable`] instead of dividing by zero. A
//! result outside `[0, 100]` can only come from inconsistent accounting; it is
//! reported as [`LoadError::OutOfRange`], never clamped.

use crate::accounting::SystemTotals;
use crate::error::LoadError;

/// One load reading
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadSample {
    /// No time has passed since the previous sample
    Unavailable,
    /// CPU busy share over the last window, 0..=100
    Percent(f32),
}

impl LoadSample {
    pub fn percent(&self) -> Option<f32> {
        match self {
            LoadSample::Unavailable => None,
            LoadSample::Percent(p) => Some(*p),
        }
    }
}

/// Windowed load estimator
pub struct LoadEstimator {
    /// Totals at the previous sample
    baseline: SystemTotals,
    latest: LoadSample,
    samples: u32,
    unavailable: u32,
    anomalies: u32,
}

impl LoadEstimator {
    pub const fn new() -> Self {
        Self {
            baseline: SystemTotals {
                elapsed: 0,
                busy: 0,
                idle: 0,
            },
            latest: LoadSample::Unavailable,
            samples: 0,
            unavailable: 0,
            anomalies: 0,
        }
    }

    /// Derive the load since the previous sample from accounting totals
    pub fn sample_load(&mut self, totals: SystemTotals) -> Result<LoadSample, LoadError> {
        let Some(elapsed) = totals.elapsed.checked_sub(self.baseline.elapsed) else {
            return Err(self.anomaly(totals, 0, 0));
        };
        if elapsed == 0 {
            self.unavailable = self.unavailable.saturating_add(1);
            return Ok(LoadSample::Unavailable);
        }

        let idle = totals.idle.checked_sub(self.baseline.idle);
        let consistent = totals.busy <= totals.elapsed;
        let idle = match idle {
            Some(idle) if idle <= elapsed && consistent => idle,
            other => return Err(self.anomaly(totals, elapsed, other.unwrap_or(0))),
        };

        let load = 100.0 * (elapsed - idle) as f32 / elapsed as f32;
        self.baseline = totals;
        self.latest = LoadSample::Percent(load);
        self.samples = self.samples.saturating_add(1);
        log_trace!("cpu load {} per mille over {} ticks", (load * 10.0) as u32, elapsed);
        Ok(self.latest)
    }

    fn anomaly(&mut self, totals: SystemTotals, elapsed: u64, idle: u64) -> LoadError {
        // Re-anchor so one bad window does not poison the next
        self.baseline = totals;
        self.anomalies = self.anomalies.saturating_add(1);
        log_warn!("load sample rejected: elapsed {} idle {} busy {}", elapsed, idle, totals.busy);
        LoadError::OutOfRange { elapsed, idle }
    }

    /// Most recent valid reading
    pub fn latest(&self) -> LoadSample {
        self.latest
    }

    /// Valid samples taken
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Samples that found no elapsed time
    pub fn unavailable(&self) -> u32 {
        self.unavailable
    }

    /// Samples rejected for inconsistent accounting
    pub fn anomalies(&self) -> u32 {
        self.anomalies
    }
}

impl Default for LoadEstimator {
    fn default() -> Self {
        Self::new()
    }
}
