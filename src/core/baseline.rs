// Per-battery baseline capacity (qd_orig)

use crate::core::error::{PipelineError, Result};
use crate::core::format::AveragedReading;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Baseline capacities captured from the "past" segment.
///
/// Each battery is written once; after `freeze` the table is read-only.
#[derive(Debug, Clone, Default)]
pub struct BaselineTable {
    values: HashMap<String, f64>,
    frozen: bool,
}

impl BaselineTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn insert(&mut self, battery: &str, qd_orig: f64) -> Result<()> {
        if self.frozen {
            return Err(PipelineError::domain(format!(
                "baseline table is frozen, cannot set {}",
                battery
            )));
        }
        if !qd_orig.is_finite() || qd_orig <= 0.0 {
            return Err(PipelineError::domain(format!(
                "baseline for {} must be positive, got {}",
                battery, qd_orig
            )));
        }
        if self.values.contains_key(battery) {
            return Err(PipelineError::domain(format!(
                "baseline for {} already captured",
                battery
            )));
        }
        self.values.insert(battery.to_string(), qd_orig);
        Ok(())
    }

    /// Capture each battery's reading at its lowest cycle.
    ///
    /// Readings are already averaged per (battery, cycle), so there is a
    /// single row at the lowest cycle and no tie to break.
    pub fn capture(&mut self, readings: &[AveragedReading]) -> Result<()> {
        let mut first: BTreeMap<&str, &AveragedReading> = BTreeMap::new();
        for reading in readings {
            first
                .entry(reading.battery_id.as_str())
                .and_modify(|cur| {
                    if reading.cycle_no < cur.cycle_no {
                        *cur = reading;
                    }
                })
                .or_insert(reading);
        }

        for (battery, reading) in first {
            debug!(
                "Baseline {} = {} (cycle {})",
                battery, reading.capacity, reading.cycle_no
            );
            self.insert(battery, reading.capacity)?;
        }
        info!("Captured {} battery baselines", self.values.len());
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn get(&self, battery: &str) -> Result<f64> {
        self.values.get(battery).copied().ok_or_else(|| {
            PipelineError::domain(format!("no baseline captured for battery {}", battery))
        })
    }
}
