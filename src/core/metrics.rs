// State-of-Health and Remaining-Useful-Life

use crate::core::baseline::BaselineTable;
use crate::core::constants::{DEAD_CAPACITY_FRACTION, MAX_PERCENT};
use crate::core::error::{PipelineError, Result};
use crate::core::format::{battery_group, AveragedReading, CycleRow, MetricsRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Capacity decay model used to extrapolate the end-of-life cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulModel {
    /// `Qd = Qd_orig - J * cycle`
    #[default]
    Linear,
    /// `Qd = Qd_orig * J^cycle`
    Logarithmic,
}

impl RulModel {
    pub fn rul(&self, capacity: f64, cycle_no: u32, qd_orig: f64) -> Result<f64> {
        match self {
            RulModel::Linear => rul_linear(capacity, cycle_no, qd_orig),
            RulModel::Logarithmic => rul_logarithmic(capacity, cycle_no, qd_orig),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn check_inputs(capacity: f64, qd_orig: f64) -> Result<()> {
    if !qd_orig.is_finite() || qd_orig <= 0.0 {
        return Err(PipelineError::domain(format!(
            "baseline capacity must be positive, got {}",
            qd_orig
        )));
    }
    if !capacity.is_finite() || capacity < 0.0 {
        return Err(PipelineError::domain(format!(
            "capacity reading must be non-negative, got {}",
            capacity
        )));
    }
    Ok(())
}

pub fn soh(capacity: f64, qd_orig: f64) -> Result<f64> {
    check_inputs(capacity, qd_orig)?;
    Ok(round2((capacity * MAX_PERCENT / qd_orig).min(MAX_PERCENT)))
}

// Shared tail of both models once the dead cycle is known
fn rul_from_dead_cycle(c_dead: f64, cycle_no: u32) -> Result<f64> {
    if c_dead == 0.0 || !c_dead.is_finite() {
        return Err(PipelineError::domain(format!(
            "end-of-life cycle is degenerate ({}) at cycle {}",
            c_dead, cycle_no
        )));
    }
    let rul = (c_dead - cycle_no as f64) * MAX_PERCENT / c_dead;
    Ok(round2(rul.min(MAX_PERCENT)))
}

pub fn rul_linear(capacity: f64, cycle_no: u32, qd_orig: f64) -> Result<f64> {
    check_inputs(capacity, qd_orig)?;
    if capacity == qd_orig {
        return Ok(MAX_PERCENT);
    }
    let qd_dead = DEAD_CAPACITY_FRACTION * qd_orig;
    let c_dead = cycle_no as f64 * (qd_dead - capacity) / (capacity - qd_orig);
    rul_from_dead_cycle(c_dead, cycle_no)
}

pub fn rul_logarithmic(capacity: f64, cycle_no: u32, qd_orig: f64) -> Result<f64> {
    check_inputs(capacity, qd_orig)?;
    if capacity == qd_orig {
        return Ok(MAX_PERCENT);
    }
    if capacity == 0.0 {
        return Err(PipelineError::domain(
            "logarithmic model is undefined for zero capacity",
        ));
    }
    let qd_dead = DEAD_CAPACITY_FRACTION * qd_orig;
    let c_dead = cycle_no as f64 * (qd_dead / capacity).ln() / (capacity / qd_orig).ln();
    rul_from_dead_cycle(c_dead, cycle_no)
}

/// Mean capacity per (battery, cycle) across all cells of the battery.
///
/// Output is ordered by cycle, then battery.
pub fn average_by_cycle(rows: &[CycleRow], battery_prefix_len: usize) -> Vec<AveragedReading> {
    let mut sums: BTreeMap<(u32, &str), (f64, usize)> = BTreeMap::new();
    for row in rows {
        let battery = battery_group(&row.battery_name, battery_prefix_len);
        let entry = sums.entry((row.cycle_no, battery)).or_insert((0.0, 0));
        entry.0 += row.qd;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|((cycle_no, battery), (sum, count))| AveragedReading {
            battery_id: battery.to_string(),
            cycle_no,
            capacity: sum / count as f64,
        })
        .collect()
}

/// SOH and RUL for every reading, against a populated baseline.
pub fn compute_metrics(
    readings: &[AveragedReading],
    baseline: &BaselineTable,
    model: RulModel,
) -> Result<Vec<MetricsRecord>> {
    readings
        .iter()
        .map(|r| {
            let qd_orig = baseline.get(&r.battery_id)?;
            Ok(MetricsRecord {
                cycle_no: r.cycle_no,
                soh: soh(r.capacity, qd_orig)?,
                rul: model.rul(r.capacity, r.cycle_no, qd_orig)?,
                capacity_reading: r.capacity,
                battery_id: r.battery_id.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_reference_scenario() {
        assert!(close(soh(0.95, 1.0).unwrap(), 95.0));
        // qd_dead 0.8, c_dead = 5 * (0.8 - 0.95) / (0.95 - 1.0) = 15
        assert!(close(rul_linear(0.95, 5, 1.0).unwrap(), 66.67));
    }

    #[test]
    fn test_logarithmic_model() {
        // c_dead = 5 * ln(0.8 / 0.95) / ln(0.95) = 16.75...
        let expected = {
            let c_dead = 5.0 * (0.8f64 / 0.95).ln() / 0.95f64.ln();
            ((c_dead - 5.0) * 100.0 / c_dead * 100.0).round() / 100.0
        };
        let rul = rul_logarithmic(0.95, 5, 1.0).unwrap();
        assert!(close(rul, expected));
        assert!(rul > 66.67);
    }

    #[test]
    fn test_sentinel_when_not_degraded() {
        assert_eq!(rul_linear(1.2, 40, 1.2).unwrap(), 100.0);
        assert_eq!(rul_logarithmic(1.2, 40, 1.2).unwrap(), 100.0);
        assert_eq!(RulModel::Logarithmic.rul(1.2, 1, 1.2).unwrap(), 100.0);
    }

    #[test]
    fn test_rul_is_capped() {
        // Capacity above baseline gives a negative dead cycle
        let rul = rul_linear(1.05, 10, 1.0).unwrap();
        assert!(rul <= 100.0);
    }

    #[test]
    fn test_degenerate_dead_cycle_is_domain_error() {
        // Reading exactly at the dead threshold
        assert!(matches!(rul_linear(0.8, 10, 1.0), Err(PipelineError::Domain(_))));
        assert!(matches!(rul_logarithmic(0.8, 10, 1.0), Err(PipelineError::Domain(_))));
        // Cycle zero collapses the linear extrapolation
        assert!(rul_linear(0.9, 0, 1.0).is_err());
        assert!(rul_logarithmic(0.0, 3, 1.0).is_err());
    }

    #[test]
    fn test_soh_is_capped() {
        assert_eq!(soh(1.3, 1.0).unwrap(), 100.0);
        assert!(soh(1.0, 0.0).is_err());
    }

    #[test]
    fn test_average_by_cycle_groups_cells_of_a_battery() {
        let rows = vec![
            CycleRow { cycle_no: 2, battery_name: "b1c0".into(), qd: 1.0 },
            CycleRow { cycle_no: 2, battery_name: "b1c1".into(), qd: 0.8 },
            CycleRow { cycle_no: 1, battery_name: "b2c0".into(), qd: 1.1 },
            CycleRow { cycle_no: 1, battery_name: "b2c0".into(), qd: 1.3 },
        ];

        let avg = average_by_cycle(&rows, 2);

        assert_eq!(avg.len(), 2);
        assert_eq!(avg[0].battery_id, "b2");
        assert!(close(avg[0].capacity, 1.2));
        assert_eq!(avg[1].cycle_no, 2);
        assert!(close(avg[1].capacity, 0.9));
    }

    #[test]
    fn test_compute_metrics_requires_baseline() {
        let readings = vec![AveragedReading {
            battery_id: "b1".into(),
            cycle_no: 5,
            capacity: 0.95,
        }];

        let empty = BaselineTable::new();
        assert!(matches!(
            compute_metrics(&readings, &empty, RulModel::Linear),
            Err(PipelineError::Domain(_))
        ));

        let mut table = BaselineTable::new();
        table.insert("b1", 1.0).unwrap();
        let out = compute_metrics(&readings, &table, RulModel::Linear).unwrap();
        assert!(close(out[0].soh, 95.0));
        assert!(close(out[0].rul, 66.67));
        assert_eq!(out[0].battery_id, "b1");
    }

    proptest! {
        #[test]
        fn prop_soh_bounded(capacity in 0.0f64..10.0, qd_orig in 0.001f64..10.0) {
            let value = soh(capacity, qd_orig).unwrap();
            prop_assert!((0.0..=100.0).contains(&value));
        }

        #[test]
        fn prop_rul_never_exceeds_cap(capacity in 0.01f64..2.0, cycle in 1u32..5000) {
            for model in [RulModel::Linear, RulModel::Logarithmic] {
                if let Ok(value) = model.rul(capacity, cycle, 1.0) {
                    prop_assert!(value <= 100.0);
                }
            }
        }
    }
}
