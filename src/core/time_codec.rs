// Cycle number <-> calendar timestamp mapping
//
// The forecaster only understands timestamps, so each cycle is treated as one
// day counted from the epoch: cycle 1 is the epoch itself.

use crate::core::constants::{INIT_YEAR, TIMESTAMP_FORMAT};
use crate::core::error::{PipelineError, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeCodec {
    epoch: NaiveDate,
}

impl Default for TimeCodec {
    fn default() -> Self {
        Self {
            epoch: NaiveDate::from_ymd_opt(INIT_YEAR, 1, 1).unwrap_or(NaiveDate::MIN),
        }
    }
}

impl TimeCodec {
    pub fn new(epoch: NaiveDate) -> Self {
        Self { epoch }
    }

    pub fn epoch(&self) -> NaiveDate {
        self.epoch
    }

    pub fn cycle_to_date(&self, cycle_no: i64) -> Result<String> {
        if cycle_no < 1 {
            return Err(PipelineError::domain(format!(
                "cycle number must be >= 1, got {}",
                cycle_no
            )));
        }

        let date = self
            .epoch
            .checked_add_days(Days::new((cycle_no - 1) as u64))
            .ok_or_else(|| {
                PipelineError::domain(format!("cycle {} is out of calendar range", cycle_no))
            })?;

        Ok(date.and_time(NaiveTime::MIN).format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn date_to_cycle(&self, date_str: &str) -> Result<u32> {
        let date = parse_date(date_str)?;
        let cycle = (date - self.epoch).num_days() + 1;

        u32::try_from(cycle)
            .ok()
            .filter(|c| *c >= 1)
            .ok_or_else(|| {
                PipelineError::domain(format!(
                    "date {} maps to cycle {} before the epoch {}",
                    date_str, cycle, self.epoch
                ))
            })
    }
}

// Drops time-of-day and any timezone suffix, keeping the local calendar date
fn parse_date(raw: &str) -> Result<NaiveDate> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_local().date());
    }

    let s = s.strip_suffix('Z').unwrap_or(s);
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| PipelineError::domain(format!("unparseable date '{}': {}", raw, e)))
}
