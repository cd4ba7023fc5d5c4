// Test-cell selection

use crate::core::error::{PipelineError, Result};
use crate::core::format::{battery_group, TimeSeriesDataset};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingOptions {
    pub cells_per_battery: usize,
    pub battery_prefix_len: usize,
    pub seed: Option<u64>,
}

/// Cells whose series reaches at least `checkpoint + horizon`.
pub fn eligible_cells(dataset: &TimeSeriesDataset, checkpoint: u32, horizon: u32) -> BTreeSet<String> {
    let last_needed = checkpoint.saturating_add(horizon);
    dataset
        .max_cycle_by_cell()
        .into_iter()
        .filter(|(_, max_cycle)| *max_cycle >= last_needed)
        .map(|(cell, _)| cell.to_string())
        .collect()
}

/// Pick the held-out cells.
///
/// Without sampling every eligible cell is used. With sampling, each battery
/// contributes exactly `cells_per_battery` cells drawn without replacement; a
/// battery with fewer eligible cells fails the run.
pub fn select_test_cells(
    eligible: &BTreeSet<String>,
    sampling: Option<&SamplingOptions>,
) -> Result<BTreeSet<String>> {
    let Some(opts) = sampling else {
        info!("Sampling disabled, using all {} eligible cells", eligible.len());
        return Ok(eligible.clone());
    };

    let mut groups: BTreeMap<&str, Vec<&String>> = BTreeMap::new();
    for cell in eligible {
        groups
            .entry(battery_group(cell, opts.battery_prefix_len))
            .or_default()
            .push(cell);
    }

    // Groups are drawn in a fixed order so a seed reproduces the same pick
    let mut rng = match opts.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut selected = BTreeSet::new();
    for (group, cells) in &groups {
        if cells.len() < opts.cells_per_battery {
            return Err(PipelineError::InsufficientPool {
                group: group.to_string(),
                available: cells.len(),
                quota: opts.cells_per_battery,
            });
        }
        let picked: Vec<_> = cells
            .choose_multiple(&mut rng, opts.cells_per_battery)
            .collect();
        debug!("Battery {}: sampled {:?}", group, picked);
        selected.extend(picked.into_iter().map(|c| c.to_string()));
    }

    info!(
        "Sampled {} test cells from {} batteries",
        selected.len(),
        groups.len()
    );
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::format::CycleRecord;

    fn cells(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn opts(k: usize, seed: u64) -> SamplingOptions {
        SamplingOptions {
            cells_per_battery: k,
            battery_prefix_len: 2,
            seed: Some(seed),
        }
    }

    #[test]
    fn test_eligibility_uses_series_length() {
        let dataset = TimeSeriesDataset::new(vec![
            CycleRecord::new("b1c0", 130, 1.0),
            CycleRecord::new("b1c1", 129, 1.0),
            CycleRecord::new("b1c2", 200, 1.0),
        ]);
        assert_eq!(eligible_cells(&dataset, 100, 30), cells(&["b1c0", "b1c2"]));
    }

    #[test]
    fn test_no_sampling_returns_all_eligible() {
        let eligible = cells(&["b1c0", "b1c1", "b2c0"]);
        assert_eq!(select_test_cells(&eligible, None).unwrap(), eligible);
    }

    #[test]
    fn test_sampling_takes_quota_per_battery() {
        let eligible = cells(&["b1c0", "b1c1", "b1c2", "b2c0", "b2c1", "b2c2", "b2c3"]);
        let picked = select_test_cells(&eligible, Some(&opts(2, 11))).unwrap();

        assert_eq!(picked.len(), 4);
        assert!(picked.is_subset(&eligible));
        assert_eq!(picked.iter().filter(|c| c.starts_with("b1")).count(), 2);
        assert_eq!(picked.iter().filter(|c| c.starts_with("b2")).count(), 2);
    }

    #[test]
    fn test_sampling_is_reproducible_with_seed() {
        let eligible: BTreeSet<String> = (0..20).map(|i| format!("b1c{}", i)).collect();
        let a = select_test_cells(&eligible, Some(&opts(5, 42))).unwrap();
        let b = select_test_cells(&eligible, Some(&opts(5, 42))).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_small_pool_fails() {
        let eligible = cells(&["b1c0", "b1c1", "b1c2", "b2c0", "b2c1", "b2c2", "b2c3", "b2c4"]);
        let err = select_test_cells(&eligible, Some(&opts(5, 1))).unwrap_err();
        match err {
            PipelineError::InsufficientPool { group, available, quota } => {
                assert_eq!(group, "b1");
                assert_eq!(available, 3);
                assert_eq!(quota, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
