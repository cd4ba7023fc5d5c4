// CSV ingestion and the partitioned writer

use crate::core::constants::*;
use crate::core::error::{PipelineError, Result};
use crate::core::format::{CycleRecord, CycleRow, TimeSeriesDataset};
use crate::core::normalizer::{normalize, NormalizeReport};
use crate::core::storage::{join_key, StorageBackend};
use crate::core::time_codec::TimeCodec;
use crate::models::pipeline_config::dir_prefix;
use bytes::Bytes;
use csv::StringRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

fn require_column(headers: &StringRecord, name: &str, source: &str) -> Result<usize> {
    column(headers, name)
        .ok_or_else(|| PipelineError::Parse(format!("Missing column '{}' in {}", name, source)))
}

fn field<'a>(record: &'a StringRecord, idx: usize, row: usize, name: &str) -> Result<&'a str> {
    record
        .get(idx)
        .map(str::trim)
        .ok_or_else(|| PipelineError::Parse(format!("Row {} has no '{}' field", row, name)))
}

fn parse_num<T>(raw: &str, row: usize, name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|e| PipelineError::Parse(format!("Row {} {} '{}': {}", row, name, raw, e)))
}

// Integer columns sometimes come through as "72.0"
fn parse_cycle(raw: &str, row: usize, name: &str) -> Result<u32> {
    if let Ok(v) = raw.parse::<u32>() {
        return Ok(v);
    }
    let v: f64 = parse_num(raw, row, name)?;
    if v.fract() != 0.0 || v < 0.0 || v > u32::MAX as f64 {
        return Err(PipelineError::Parse(format!(
            "Row {} {} '{}' is not a cycle number",
            row, name, raw
        )));
    }
    Ok(v as u32)
}

#[derive(Clone, Copy)]
enum CycleSource {
    Cycle(usize),
    Date(usize),
}

/// Parse the raw cycling dataset.
///
/// Needs a cell column and a capacity column, plus either `cycle_no` or a
/// `date` column that is mapped back to cycles through `codec`.
pub fn read_raw_dataset(data: &[u8], codec: &TimeCodec) -> Result<TimeSeriesDataset> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(data);
    let headers = rdr.headers()?.clone();

    let i_cell = require_column(&headers, COL_CELL, "raw dataset")?;
    let i_capacity = require_column(&headers, COL_CAPACITY, "raw dataset")?;
    let i_life = column(&headers, COL_CYCLE_LIFE);

    let cycle_source = match (column(&headers, COL_CYCLE), column(&headers, COL_DATE)) {
        (Some(i), _) => CycleSource::Cycle(i),
        (None, Some(i)) => CycleSource::Date(i),
        (None, None) => {
            return Err(PipelineError::Parse(format!(
                "Raw dataset needs a '{}' or '{}' column",
                COL_CYCLE, COL_DATE
            )))
        }
    };

    let mut records = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;

        let cycle_no = match cycle_source {
            CycleSource::Cycle(i) => parse_cycle(field(&record, i, row, COL_CYCLE)?, row, COL_CYCLE)?,
            CycleSource::Date(i) => codec.date_to_cycle(field(&record, i, row, COL_DATE)?)?,
        };
        if cycle_no < 1 {
            return Err(PipelineError::domain(format!("Row {} has cycle number 0", row)));
        }

        let cycle_life = match i_life {
            Some(i) => {
                let raw = field(&record, i, row, COL_CYCLE_LIFE)?;
                if raw.is_empty() {
                    None
                } else {
                    Some(parse_cycle(raw, row, COL_CYCLE_LIFE)?)
                }
            }
            None => None,
        };

        records.push(CycleRecord {
            cell_id: field(&record, i_cell, row, COL_CELL)?.to_string(),
            cycle_no,
            capacity: parse_num(field(&record, i_capacity, row, COL_CAPACITY)?, row, COL_CAPACITY)?,
            cycle_life,
        });
    }

    info!("Loaded {} raw records", records.len());
    Ok(TimeSeriesDataset::new(records))
}

/// Parse a per-cell file written by the partitioned writer.
pub fn read_cycle_rows(data: &[u8]) -> Result<Vec<CycleRow>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(data);
    let rows = rdr
        .deserialize::<CycleRow>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Parse a forecast export (`item_id`, `date`, `p50`, ...) into cycle rows.
pub fn read_forecast_export(data: &[u8], codec: &TimeCodec) -> Result<Vec<CycleRow>> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(data);
    let headers = rdr.headers()?.clone();

    let i_item = require_column(&headers, COL_ITEM_ID, "forecast export")?;
    let i_date = require_column(&headers, COL_DATE, "forecast export")?;
    let i_p50 = require_column(&headers, COL_P50, "forecast export")?;

    let mut rows = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        rows.push(CycleRow {
            cycle_no: codec.date_to_cycle(field(&record, i_date, row, COL_DATE)?)?,
            battery_name: field(&record, i_item, row, COL_ITEM_ID)?.to_string(),
            qd: parse_num(field(&record, i_p50, row, COL_P50)?, row, COL_P50)?,
        });
    }
    Ok(rows)
}

fn encode_csv<T: Serialize>(rows: &[&T], header: bool) -> Result<Bytes> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(header)
        .from_writer(Vec::new());
    for row in rows {
        wtr.serialize(row)?;
    }
    let data = wtr
        .into_inner()
        .map_err(|e| PipelineError::Io(e.into_error()))?;
    Ok(Bytes::from(data))
}

fn part_file_name() -> String {
    format!("{}00000-{}{}", PART_FILE_PREFIX, Uuid::new_v4(), CSV_EXTENSION)
}

/// Stage rows as `<prefix>/<key>=<value>/part-*.csv`, one part per value.
///
/// Returns the number of partitions written.
pub async fn write_partitioned<S, T, F>(
    storage: &S,
    prefix: &str,
    key: &str,
    rows: &[T],
    header: bool,
    partition_of: F,
) -> Result<usize>
where
    S: StorageBackend + ?Sized,
    T: Serialize,
    F: Fn(&T) -> String,
{
    let mut partitions: BTreeMap<String, Vec<&T>> = BTreeMap::new();
    for row in rows {
        partitions.entry(partition_of(row)).or_default().push(row);
    }

    for (value, part_rows) in &partitions {
        let path = join_key(&[prefix, &format!("{}={}", key, value), &part_file_name()]);
        let data = encode_csv(part_rows, header)?;
        debug!("Staging {} rows at {}", part_rows.len(), path);
        storage.put(&path, data).await?;
    }

    Ok(partitions.len())
}

/// Write a dataset partitioned by `key` and normalize it in place.
pub async fn save_partitioned<S, T, F>(
    storage: &S,
    prefix: &str,
    key: &str,
    rows: &[T],
    partition_of: F,
) -> Result<NormalizeReport>
where
    S: StorageBackend + ?Sized,
    T: Serialize,
    F: Fn(&T) -> String,
{
    let count = write_partitioned(storage, prefix, key, rows, true, partition_of).await?;
    info!("Wrote {} partitions under {}", count, prefix);
    Ok(normalize(storage, prefix).await)
}

/// Write a single headerless file at `<dir>/<stem>.csv`.
///
/// The file goes through the same staging and rename as partitioned output so
/// a crash mid-way is reconciled by the next run the same way. Leftover parts
/// in the staging directory are removed first.
pub async fn save_flat<S, T>(storage: &S, dir: &str, stem: &str, rows: &[T]) -> Result<NormalizeReport>
where
    S: StorageBackend + ?Sized,
    T: Serialize,
{
    let staging = join_key(&[dir, &format!("{}={}", FLAT_PARTITION_KEY, stem)]);
    // Parts left by an earlier run would compete with this one
    let stale = storage.delete_prefix(&dir_prefix(&staging)).await?;
    if stale > 0 {
        warn!("Cleared {} stale staged parts under {}", stale, staging);
    }
    let refs: Vec<&T> = rows.iter().collect();
    let data = encode_csv(&refs, false)?;
    storage.put(&join_key(&[&staging, &part_file_name()]), data).await?;
    info!("Wrote {} rows to {}/{}{}", rows.len(), dir, stem, CSV_EXTENSION);
    Ok(normalize(storage, &staging).await)
}

/// Read every `.csv` object under `prefix` and concatenate the rows.
pub async fn read_csv_objects<S, T, F>(storage: &S, prefix: &str, parse: F) -> Result<Vec<T>>
where
    S: StorageBackend + ?Sized,
    F: Fn(&[u8]) -> Result<Vec<T>>,
{
    let mut out = Vec::new();
    for object in storage.list(prefix).await? {
        if !object.path.ends_with(CSV_EXTENSION) {
            continue;
        }
        let data = storage.get(&object.path).await?;
        out.extend(parse(&data)?);
    }
    Ok(out)
}
