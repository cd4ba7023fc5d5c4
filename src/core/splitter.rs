// Train/test split around the checkpoint cycle

use crate::core::error::{PipelineError, Result};
use crate::core::format::{CycleRecord, CycleRow, DatedRow, IdRow, TimeSeriesDataset};
use crate::core::time_codec::TimeCodec;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Training and test windows of one dataset.
#[derive(Debug, Clone)]
pub struct Split {
    pub checkpoint: u32,
    pub horizon: u32,
    pub train: Vec<CycleRecord>,
    pub test: Vec<CycleRecord>,
    pub test_cells: BTreeSet<String>,
}

/// Split `dataset` at `checkpoint`.
///
/// The test window holds cycles `checkpoint + 1 ..= checkpoint + horizon` of
/// the test cells and must contain exactly `horizon` records per cell.
pub fn split(
    dataset: &TimeSeriesDataset,
    checkpoint: u32,
    horizon: u32,
    test_cells: &BTreeSet<String>,
) -> Result<Split> {
    let window_end = checkpoint.saturating_add(horizon);

    let train: Vec<CycleRecord> = dataset
        .records
        .iter()
        .filter(|r| r.cycle_no <= checkpoint)
        .cloned()
        .collect();

    let test: Vec<CycleRecord> = dataset
        .records
        .iter()
        .filter(|r| r.cycle_no > checkpoint && r.cycle_no <= window_end)
        .filter(|r| test_cells.contains(&r.cell_id))
        .cloned()
        .collect();

    let expected = horizon as usize * test_cells.len();
    if test.len() != expected {
        return Err(PipelineError::IncompleteWindow {
            expected,
            actual: test.len(),
        });
    }
    check_windows(&test, horizon, test_cells)?;

    if test_cells.is_empty() {
        warn!("No test cells reach cycle {}, test window is empty", window_end);
    }
    info!(
        "Split at cycle {}: {} train records, {} test records over {} cells",
        checkpoint,
        train.len(),
        test.len(),
        test_cells.len()
    );

    Ok(Split {
        checkpoint,
        horizon,
        train,
        test,
        test_cells: test_cells.clone(),
    })
}

/// Every test cell must hold each window cycle exactly once. A gap in one
/// cell and a duplicate in another leave the total count intact.
fn check_windows(test: &[CycleRecord], horizon: u32, test_cells: &BTreeSet<String>) -> Result<()> {
    let mut by_cell: BTreeMap<&str, (usize, BTreeSet<u32>)> = BTreeMap::new();
    for record in test {
        let (rows, cycles) = by_cell.entry(record.cell_id.as_str()).or_default();
        *rows += 1;
        cycles.insert(record.cycle_no);
    }

    let expected = horizon as usize;
    for cell in test_cells {
        let (rows, distinct) = by_cell
            .get(cell.as_str())
            .map(|(rows, cycles)| (*rows, cycles.len()))
            .unwrap_or((0, 0));
        if rows != expected || distinct != expected {
            warn!(
                "Test window of {} has {} rows over {} distinct cycles, expected {}",
                cell, rows, distinct, expected
            );
            return Err(PipelineError::IncompleteWindow {
                expected,
                actual: distinct,
            });
        }
    }
    Ok(())
}

impl Split {
    /// Date-keyed training rows for the forecaster (all cells).
    pub fn train_by_date(&self, codec: &TimeCodec) -> Result<Vec<DatedRow>> {
        to_dated(&self.train, codec)
    }

    pub fn test_by_date(&self, codec: &TimeCodec) -> Result<Vec<DatedRow>> {
        to_dated(&self.test, codec)
    }

    /// Cycle-keyed training rows, only for cells that also have a test window.
    pub fn train_by_cycle(&self) -> Vec<CycleRow> {
        self.train
            .iter()
            .filter(|r| self.test_cells.contains(&r.cell_id))
            .map(CycleRow::from)
            .collect()
    }

    pub fn test_by_cycle(&self) -> Vec<CycleRow> {
        self.test.iter().map(CycleRow::from).collect()
    }

    pub fn test_ids(&self) -> Vec<IdRow> {
        self.test_cells
            .iter()
            .map(|cell| IdRow {
                battery_name: cell.clone(),
            })
            .collect()
    }
}

fn to_dated(records: &[CycleRecord], codec: &TimeCodec) -> Result<Vec<DatedRow>> {
    records
        .iter()
        .map(|r| {
            Ok(DatedRow {
                date: codec.cycle_to_date(r.cycle_no as i64)?,
                battery_name: r.cell_id.clone(),
                qd: r.capacity,
            })
        })
        .collect()
}

/// Checkpoint derived from the spread of series lengths.
///
/// Nearest-rank `quantile` of the per-cell `cycle_life` values, so roughly
/// that fraction of cells ends before the checkpoint.
pub fn quantile_checkpoint(dataset: &TimeSeriesDataset, quantile: f64) -> Result<u32> {
    let mut lives: Vec<(&str, u32)> = dataset
        .records
        .iter()
        .filter_map(|r| r.cycle_life.map(|life| (r.cell_id.as_str(), life)))
        .collect();
    lives.sort_unstable();
    lives.dedup_by(|a, b| a.0 == b.0);

    let mut values: Vec<u32> = lives.into_iter().map(|(_, life)| life).collect();
    if values.is_empty() {
        return Err(PipelineError::Parse(
            "No cycle_life values to derive a checkpoint from".to_string(),
        ));
    }
    values.sort_unstable();

    let rank = (quantile * values.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(values.len() - 1);
    Ok(values[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(cell: &str, cycles: std::ops::RangeInclusive<u32>) -> Vec<CycleRecord> {
        cycles
            .map(|c| CycleRecord::new(cell, c, 1.0 - c as f64 * 0.001))
            .collect()
    }

    fn three_cells() -> (TimeSeriesDataset, BTreeSet<String>) {
        let mut records = Vec::new();
        for cell in ["b1c0", "b1c1", "b2c0"] {
            records.extend(series(cell, 1..=140));
        }
        let cells = ["b1c0", "b1c1", "b2c0"].iter().map(|s| s.to_string()).collect();
        (TimeSeriesDataset::new(records), cells)
    }

    #[test]
    fn test_window_has_exact_cardinality() {
        let (dataset, cells) = three_cells();
        let split = split(&dataset, 100, 30, &cells).unwrap();

        assert_eq!(split.test.len(), 90);
        assert_eq!(split.train.len(), 300);
        assert!(split.test.iter().all(|r| r.cycle_no > 100 && r.cycle_no <= 130));
    }

    #[test]
    fn test_missing_cycle_fails_the_split() {
        let (mut dataset, cells) = three_cells();
        dataset
            .records
            .retain(|r| !(r.cell_id == "b1c1" && r.cycle_no == 117));

        let err = split(&dataset, 100, 30, &cells).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompleteWindow {
                expected: 90,
                actual: 89
            }
        ));
    }

    #[test]
    fn test_duplicate_cycle_fails_the_split() {
        let (mut dataset, cells) = three_cells();
        dataset.records.push(CycleRecord::new("b2c0", 110, 0.9));
        assert!(split(&dataset, 100, 30, &cells).is_err());
    }

    #[test]
    fn test_gap_offset_by_duplicate_fails_the_split() {
        let mut records = series("b1c0", 1..=130);
        records.extend(series("b1c1", 1..=130));
        records.retain(|r| !(r.cell_id == "b1c0" && r.cycle_no == 117));
        records.push(CycleRecord::new("b1c1", 110, 0.9));
        let dataset = TimeSeriesDataset::new(records);
        let cells: BTreeSet<String> = ["b1c0", "b1c1"].iter().map(|s| s.to_string()).collect();

        let err = split(&dataset, 100, 30, &cells).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompleteWindow {
                expected: 30,
                actual: 29
            }
        ));
    }

    #[test]
    fn test_duplicate_in_single_cell_window_fails() {
        let mut records = series("b1c0", 1..=130);
        records.retain(|r| r.cycle_no != 130);
        records.push(CycleRecord::new("b1c0", 101, 0.9));
        let dataset = TimeSeriesDataset::new(records);
        let cells: BTreeSet<String> = ["b1c0".to_string()].into_iter().collect();

        let err = split(&dataset, 100, 30, &cells).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::IncompleteWindow {
                expected: 30,
                actual: 29
            }
        ));
    }

    #[test]
    fn test_projections() {
        let (dataset, _) = three_cells();
        let test_cells: BTreeSet<String> = ["b1c0".to_string()].into_iter().collect();
        let split = split(&dataset, 100, 30, &test_cells).unwrap();
        let codec = TimeCodec::default();

        // Forecaster sees every cell's history
        assert_eq!(split.train_by_date(&codec).unwrap().len(), 300);
        // UI only plots cells with an actual window
        assert_eq!(split.train_by_cycle().len(), 100);

        let test_dates = split.test_by_date(&codec).unwrap();
        assert_eq!(test_dates[0].date, "2000-04-10 00:00:00");
        assert_eq!(split.test_ids().len(), 1);
    }

    #[test]
    fn test_quantile_checkpoint_uses_one_value_per_cell() {
        let mut records = Vec::new();
        for (cell, life) in [("a", 100), ("b", 200), ("c", 300), ("d", 400)] {
            for cycle in 1..=3 {
                let mut r = CycleRecord::new(cell, cycle, 1.0);
                r.cycle_life = Some(life);
                records.push(r);
            }
        }
        let dataset = TimeSeriesDataset::new(records);

        assert_eq!(quantile_checkpoint(&dataset, 0.5).unwrap(), 200);
        assert_eq!(quantile_checkpoint(&dataset, 0.0).unwrap(), 100);
        assert_eq!(quantile_checkpoint(&dataset, 1.0).unwrap(), 400);
        assert!(quantile_checkpoint(&TimeSeriesDataset::default(), 0.5).is_err());
    }
}
