use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::core::constants::*;
use crate::core::error::{PipelineError, Result};
use crate::core::metrics::RulModel;
use crate::core::sampler::SamplingOptions;
use crate::core::storage::{join_key, parent_key};
use crate::core::time_codec::TimeCodec;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub job_id: String,
    pub storage_root: String,
    pub raw_dataset_key: String,
    #[serde(default)]
    pub data_checkpoint: Option<u32>,
    #[serde(default = "default_horizon")]
    pub forecast_horizon: u32,
    #[serde(default)]
    pub sampling: Sampling,
    #[serde(default)]
    pub rul_model: RulModel,
    #[serde(default = "default_epoch")]
    pub epoch: NaiveDate,
    #[serde(default = "default_prefix_len")]
    pub battery_prefix_len: usize,
    #[serde(default = "default_quantile")]
    pub quantile_cutoff: f64,
    #[serde(default)]
    pub forecast_export_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sampling {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cells_per_battery")]
    pub cells_per_battery: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            enabled: false,
            cells_per_battery: DEFAULT_CELLS_PER_BATTERY,
            seed: None,
        }
    }
}

fn default_horizon() -> u32 {
    DEFAULT_FORECAST_HORIZON
}

fn default_epoch() -> NaiveDate {
    TimeCodec::default().epoch()
}

fn default_prefix_len() -> usize {
    DEFAULT_BATTERY_PREFIX_LEN
}

fn default_quantile() -> f64 {
    DEFAULT_QUANTILE_CUTOFF
}

fn default_cells_per_battery() -> usize {
    DEFAULT_CELLS_PER_BATTERY
}

impl PipelineConfig {
    /// Config with defaults for everything but the required keys.
    pub fn new(
        job_id: impl Into<String>,
        storage_root: impl Into<String>,
        raw_dataset_key: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            storage_root: storage_root.into(),
            raw_dataset_key: raw_dataset_key.into(),
            data_checkpoint: None,
            forecast_horizon: default_horizon(),
            sampling: Sampling::default(),
            rul_model: RulModel::default(),
            epoch: default_epoch(),
            battery_prefix_len: default_prefix_len(),
            quantile_cutoff: default_quantile(),
            forecast_export_prefix: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            return Err(PipelineError::Config("job_id must not be empty".into()));
        }
        if self.raw_dataset_key.trim().is_empty() {
            return Err(PipelineError::Config("raw_dataset_key must not be empty".into()));
        }
        if self.forecast_horizon == 0 {
            return Err(PipelineError::Config("forecast_horizon must be at least 1".into()));
        }
        if self.sampling.cells_per_battery == 0 {
            return Err(PipelineError::Config(
                "sampling.cells_per_battery must be at least 1".into(),
            ));
        }
        if self.battery_prefix_len == 0 {
            return Err(PipelineError::Config("battery_prefix_len must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.quantile_cutoff) {
            return Err(PipelineError::Config(format!(
                "quantile_cutoff must be within [0, 1], got {}",
                self.quantile_cutoff
            )));
        }
        Ok(())
    }

    pub fn codec(&self) -> TimeCodec {
        TimeCodec::new(self.epoch)
    }

    pub fn sampling_options(&self) -> Option<SamplingOptions> {
        self.sampling.enabled.then(|| SamplingOptions {
            cells_per_battery: self.sampling.cells_per_battery,
            battery_prefix_len: self.battery_prefix_len,
            seed: self.sampling.seed,
        })
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(parent_key(&self.raw_dataset_key), self.forecast_export_prefix.clone())
    }
}

/// Where each artifact of a run lives, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    pub base: String,
    forecast_export: Option<String>,
}

impl StorageLayout {
    pub fn new(base: impl Into<String>, forecast_export: Option<String>) -> Self {
        Self {
            base: base.into(),
            forecast_export,
        }
    }

    pub fn flat_file(&self, stem: &str) -> String {
        join_key(&[&self.base, &format!("{}{}", stem, CSV_EXTENSION)])
    }

    pub fn work_area(&self) -> String {
        join_key(&[&self.base, WORK_DIR])
    }

    pub fn work_segment(&self, segment: &str) -> String {
        join_key(&[&self.base, WORK_DIR, segment])
    }

    pub fn plot_area(&self) -> String {
        join_key(&[&self.base, PLOT_DIR])
    }

    pub fn plot_segment(&self, segment: &str) -> String {
        join_key(&[&self.base, PLOT_DIR, segment])
    }

    pub fn forecast_export(&self) -> String {
        self.forecast_export
            .clone()
            .unwrap_or_else(|| join_key(&[&self.base, FORECAST_EXPORT_DIR]))
    }

    pub fn commit_marker(&self, job_id: &str, job: &str) -> String {
        join_key(&[&self.base, JOBS_DIR, &format!("{}-{}.json", job_id, job)])
    }
}

/// Directory form of a key, for prefix listings that must not match siblings.
pub fn dir_prefix(key: &str) -> String {
    format!("{}/", key.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_json() {
        let json = r#"{
            "job_id": "job-1",
            "storage_root": "/data",
            "raw_dataset_key": "user/pipe/raw.csv"
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.forecast_horizon, 30);
        assert_eq!(config.sampling.cells_per_battery, 5);
        assert!(!config.sampling.enabled);
        assert_eq!(config.rul_model, RulModel::Linear);
        assert_eq!(config.epoch, NaiveDate::from_ymd_opt(2000, 1, 1).unwrap());
        assert!(config.sampling_options().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_json() {
        let json = r#"{
            "job_id": "job-2",
            "storage_root": "/data",
            "raw_dataset_key": "user/pipe/raw.csv",
            "data_checkpoint": 100,
            "forecast_horizon": 10,
            "sampling": { "enabled": true, "cells_per_battery": 3, "seed": 9 },
            "rul_model": "logarithmic",
            "epoch": "2010-06-01"
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.data_checkpoint, Some(100));
        assert_eq!(config.rul_model, RulModel::Logarithmic);
        let opts = config.sampling_options().unwrap();
        assert_eq!(opts.cells_per_battery, 3);
        assert_eq!(opts.seed, Some(9));
        assert_eq!(config.codec().cycle_to_date(1).unwrap(), "2010-06-01 00:00:00");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::new("j", "/data", "a/raw.csv");
        config.forecast_horizon = 0;
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));

        let mut config = PipelineConfig::new("j", "/data", "a/raw.csv");
        config.quantile_cutoff = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_layout() {
        let config = PipelineConfig::new("j", "/data", "user/pipe/raw.csv");
        let layout = config.layout();

        assert_eq!(layout.flat_file(TRAIN_FILE), "user/pipe/train_dataset.csv");
        assert_eq!(layout.work_segment("past"), "user/pipe/tmp/past");
        assert_eq!(layout.plot_segment("actual"), "user/pipe/plot/actual");
        assert_eq!(layout.forecast_export(), "user/pipe/forecast_export");
        assert_eq!(layout.commit_marker("j", "prepare"), "user/pipe/_jobs/j-prepare.json");
        assert_eq!(dir_prefix("user/pipe/tmp"), "user/pipe/tmp/");
    }
}
