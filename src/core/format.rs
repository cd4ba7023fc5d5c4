// Data structures shared by the pipeline stages

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One capacity measurement of one cell at one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub cell_id: String,
    pub cycle_no: u32,
    pub capacity: f64,
    pub cycle_life: Option<u32>,
}

impl CycleRecord {
    pub fn new(cell_id: impl Into<String>, cycle_no: u32, capacity: f64) -> Self {
        Self {
            cell_id: cell_id.into(),
            cycle_no,
            capacity,
            cycle_life: None,
        }
    }
}

/// Cycle records of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct TimeSeriesDataset {
    pub records: Vec<CycleRecord>,
}

impl TimeSeriesDataset {
    pub fn new(records: Vec<CycleRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sort by (cycle_no, cell_id), the order the forecaster expects.
    pub fn sort_by_cycle(&mut self) {
        self.records
            .sort_by(|a, b| a.cycle_no.cmp(&b.cycle_no).then_with(|| a.cell_id.cmp(&b.cell_id)));
    }

    /// Last cycle reached by each cell.
    pub fn max_cycle_by_cell(&self) -> BTreeMap<&str, u32> {
        let mut out: BTreeMap<&str, u32> = BTreeMap::new();
        for record in &self.records {
            let entry = out.entry(record.cell_id.as_str()).or_insert(record.cycle_no);
            if record.cycle_no > *entry {
                *entry = record.cycle_no;
            }
        }
        out
    }
}

/// Battery a cell belongs to: a fixed-length prefix of its id.
pub fn battery_group(cell_id: &str, prefix_len: usize) -> &str {
    match cell_id.char_indices().nth(prefix_len) {
        Some((idx, _)) => &cell_id[..idx],
        None => cell_id,
    }
}

/// Named data segments, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    Past,
    Actual,
    Predictions,
}

impl Segment {
    /// "past" must come first: it populates the baseline the others read.
    pub const ORDERED: [Segment; 3] = [Segment::Past, Segment::Actual, Segment::Predictions];

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Past => "past",
            Segment::Actual => "actual",
            Segment::Predictions => "predictions",
        }
    }

    pub fn captures_baseline(&self) -> bool {
        matches!(self, Segment::Past)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Output rows

/// Date-keyed row for the external forecaster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatedRow {
    pub date: String,
    pub battery_name: String,
    pub qd: f64,
}

/// Cycle-keyed row for the visualization areas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRow {
    pub cycle_no: u32,
    pub battery_name: String,
    pub qd: f64,
}

impl From<&CycleRecord> for CycleRow {
    fn from(record: &CycleRecord) -> Self {
        Self {
            cycle_no: record.cycle_no,
            battery_name: record.cell_id.clone(),
            qd: record.capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdRow {
    pub battery_name: String,
}

/// Capacity averaged over all cells of a battery at one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct AveragedReading {
    pub battery_id: String,
    pub cycle_no: u32,
    pub capacity: f64,
}

/// Health indicators of one battery at one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsRecord {
    #[serde(rename = "cycle")]
    pub cycle_no: u32,
    #[serde(serialize_with = "two_decimals")]
    pub soh: f64,
    #[serde(serialize_with = "two_decimals")]
    pub rul: f64,
    pub capacity_reading: f64,
    pub battery_id: String,
}

fn two_decimals<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{:.2}", value))
}
