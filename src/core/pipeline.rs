// Batch jobs.
//
// `prepare` turns the raw cycling dataset into the forecaster's input files
// and the cycle-keyed `past`/`actual` work areas. `postprocess` brings the
// forecaster's export back to cycles and computes SOH/RUL for every segment
// into the `plot` area. Every fatal check runs before the step that writes
// the affected output, and a job only counts as done once its commit marker
// is written.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::baseline::BaselineTable;
use crate::core::constants::*;
use crate::core::csv_io::{
    read_csv_objects, read_cycle_rows, read_forecast_export, read_raw_dataset, save_flat,
    save_partitioned,
};
use crate::core::error::{PipelineError, Result};
use crate::core::format::{CycleRow, MetricsRecord, Segment};
use crate::core::metrics::{average_by_cycle, compute_metrics, RulModel};
use crate::core::normalizer::NormalizeReport;
use crate::core::sampler::{eligible_cells, select_test_cells};
use crate::core::splitter::{quantile_checkpoint, split};
use crate::core::storage::StorageBackend;
use crate::models::pipeline_config::{dir_prefix, PipelineConfig, StorageLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Prepare,
    Postprocess,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Prepare => "prepare",
            JobKind::Postprocess => "postprocess",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobCommit {
    pub job_id: String,
    pub job: JobKind,
    pub committed_at: DateTime<Utc>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PrepareReport {
    pub checkpoint: u32,
    pub test_cells: Vec<String>,
    pub train_records: usize,
    pub test_records: usize,
    pub outputs: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PostprocessReport {
    pub predictions_imported: usize,
    pub batteries: usize,
    pub segments: Vec<(Segment, usize)>,
    pub outputs: Vec<String>,
    pub warnings: Vec<String>,
}

fn collect(report: NormalizeReport, outputs: &mut Vec<String>, warnings: &mut Vec<String>) {
    outputs.extend(report.renamed);
    warnings.extend(report.warnings);
}

async fn commit<S>(
    storage: &S,
    layout: &StorageLayout,
    job_id: &str,
    job: JobKind,
    outputs: &[String],
) -> Result<String>
where
    S: StorageBackend + ?Sized,
{
    let marker = layout.commit_marker(job_id, job.as_str());
    let record = JobCommit {
        job_id: job_id.to_string(),
        job,
        committed_at: Utc::now(),
        outputs: outputs.to_vec(),
    };
    let data = serde_json::to_vec_pretty(&record)?;
    storage.put(&marker, Bytes::from(data)).await?;
    info!("Committed {} job {} at {}", job.as_str(), job_id, marker);
    Ok(marker)
}

/// Split the raw dataset into forecaster input and UI work areas.
pub async fn run_prepare<S>(storage: &S, config: &PipelineConfig) -> Result<PrepareReport>
where
    S: StorageBackend + ?Sized,
{
    config.validate()?;
    let layout = config.layout();
    let codec = config.codec();

    info!("Preparing {} for job {}", config.raw_dataset_key, config.job_id);
    let raw = storage.get(&config.raw_dataset_key).await?;
    let mut dataset = read_raw_dataset(&raw, &codec)?;
    dataset.sort_by_cycle();

    let checkpoint = match config.data_checkpoint {
        Some(c) => c,
        None => {
            let c = quantile_checkpoint(&dataset, config.quantile_cutoff)?;
            info!("Derived checkpoint {} from cycle_life quantile {}", c, config.quantile_cutoff);
            c
        }
    };
    let horizon = config.forecast_horizon;

    let eligible = eligible_cells(&dataset, checkpoint, horizon);
    let sampling = config.sampling_options();
    let test_cells = select_test_cells(&eligible, sampling.as_ref())?;
    let split = split(&dataset, checkpoint, horizon, &test_cells)?;

    // Date conversion can fail too, so finish it before anything is written
    let train_by_date = split.train_by_date(&codec)?;
    let test_by_date = split.test_by_date(&codec)?;

    let past_dir = layout.work_segment(Segment::Past.as_str());
    let actual_dir = layout.work_segment(Segment::Actual.as_str());
    for dir in [&past_dir, &actual_dir] {
        let removed = storage.delete_prefix(&dir_prefix(dir)).await?;
        if removed > 0 {
            info!("Cleared {} stale objects from {}", removed, dir);
        }
    }

    let mut report = PrepareReport {
        checkpoint,
        test_cells: test_cells.iter().cloned().collect(),
        train_records: split.train.len(),
        test_records: split.test.len(),
        ..PrepareReport::default()
    };

    let written = save_flat(storage, &layout.base, TRAIN_FILE, &train_by_date).await?;
    collect(written, &mut report.outputs, &mut report.warnings);

    let rows = split.train_by_cycle();
    let written = save_partitioned(storage, &past_dir, COL_CELL, &rows, |r: &CycleRow| {
        r.battery_name.clone()
    })
    .await?;
    collect(written, &mut report.outputs, &mut report.warnings);

    let written = save_flat(storage, &layout.base, TEST_FILE, &test_by_date).await?;
    collect(written, &mut report.outputs, &mut report.warnings);

    let rows = split.test_by_cycle();
    let written = save_partitioned(storage, &actual_dir, COL_CELL, &rows, |r: &CycleRow| {
        r.battery_name.clone()
    })
    .await?;
    collect(written, &mut report.outputs, &mut report.warnings);

    let written = save_flat(storage, &layout.base, TEST_IDS_FILE, &split.test_ids()).await?;
    collect(written, &mut report.outputs, &mut report.warnings);

    commit(storage, &layout, &config.job_id, JobKind::Prepare, &report.outputs).await?;
    Ok(report)
}

/// Bring the forecaster's export back to cycle numbers under `tmp/predictions`.
pub async fn import_predictions<S>(storage: &S, config: &PipelineConfig) -> Result<NormalizeReport>
where
    S: StorageBackend + ?Sized,
{
    let layout = config.layout();
    let codec = config.codec();
    let export = layout.forecast_export();

    let mut rows = read_csv_objects(storage, &dir_prefix(&export), |data| {
        read_forecast_export(data, &codec)
    })
    .await?;
    if rows.is_empty() {
        warn!("No forecast rows found under {}", export);
    }
    rows.sort_by(|a, b| {
        a.battery_name
            .cmp(&b.battery_name)
            .then_with(|| a.cycle_no.cmp(&b.cycle_no))
    });

    let target = layout.work_segment(Segment::Predictions.as_str());
    storage.delete_prefix(&dir_prefix(&target)).await?;

    info!("Importing {} forecast rows into {}", rows.len(), target);
    save_partitioned(storage, &target, COL_CELL, &rows, |r: &CycleRow| r.battery_name.clone()).await
}

/// SOH/RUL computation over the work-area segments.
///
/// Owns the baseline table: "past" fills and freezes it, every other segment
/// only reads it, so running them first is a domain error.
pub struct MetricsStage<'a, S: ?Sized> {
    storage: &'a S,
    layout: StorageLayout,
    battery_prefix_len: usize,
    model: RulModel,
    baseline: BaselineTable,
}

impl<'a, S> MetricsStage<'a, S>
where
    S: StorageBackend + ?Sized,
{
    pub fn new(storage: &'a S, config: &PipelineConfig) -> Self {
        Self {
            storage,
            layout: config.layout(),
            battery_prefix_len: config.battery_prefix_len,
            model: config.rul_model,
            baseline: BaselineTable::new(),
        }
    }

    pub fn baseline(&self) -> &BaselineTable {
        &self.baseline
    }

    /// Metrics for one segment, without writing anything.
    pub async fn compute_segment(&mut self, segment: Segment) -> Result<Vec<MetricsRecord>> {
        if segment.captures_baseline() == self.baseline.is_frozen() {
            return Err(PipelineError::domain(if segment.captures_baseline() {
                format!("segment {} already captured the baseline", segment)
            } else {
                format!("segment {} needs the baseline from {} first", segment, Segment::Past)
            }));
        }

        let source = dir_prefix(&self.layout.work_segment(segment.as_str()));
        let rows = read_csv_objects(self.storage, &source, read_cycle_rows).await?;
        if rows.is_empty() {
            warn!("Segment {} has no rows under {}", segment, source);
        }
        let readings = average_by_cycle(&rows, self.battery_prefix_len);

        if segment.captures_baseline() {
            self.baseline.capture(&readings)?;
            self.baseline.freeze();
        }

        let metrics = compute_metrics(&readings, &self.baseline, self.model)?;
        info!("Segment {}: {} metric rows", segment, metrics.len());
        Ok(metrics)
    }

    /// Compute a segment and save it under `plot/<segment>`, one file per battery.
    pub async fn process_segment(
        &mut self,
        segment: Segment,
    ) -> Result<(Vec<MetricsRecord>, NormalizeReport)> {
        let metrics = self.compute_segment(segment).await?;
        let target = self.layout.plot_segment(segment.as_str());
        let report = save_partitioned(
            self.storage,
            &target,
            PLOT_PARTITION_KEY,
            &metrics,
            |m: &MetricsRecord| m.battery_id.clone(),
        )
        .await?;
        Ok((metrics, report))
    }
}

/// Import predictions and produce the plot area for every segment.
pub async fn run_postprocess<S>(storage: &S, config: &PipelineConfig) -> Result<PostprocessReport>
where
    S: StorageBackend + ?Sized,
{
    config.validate()?;
    let layout = config.layout();
    let mut report = PostprocessReport::default();

    let imported = import_predictions(storage, config).await?;
    report.predictions_imported = imported.renamed.len();
    report.warnings.extend(imported.warnings);

    let removed = storage.delete_prefix(&dir_prefix(&layout.plot_area())).await?;
    info!("Purged {} objects from {}", removed, layout.plot_area());

    let mut stage = MetricsStage::new(storage, config);
    for segment in Segment::ORDERED {
        let (metrics, written) = stage.process_segment(segment).await?;
        report.segments.push((segment, metrics.len()));
        collect(written, &mut report.outputs, &mut report.warnings);
    }
    report.batteries = stage.baseline().len();

    // Best effort: leftovers are cleared by the next run's purges
    match storage.delete_prefix(&dir_prefix(&layout.work_area())).await {
        Ok(removed) => info!("Purged {} objects from {}", removed, layout.work_area()),
        Err(e) => {
            let message = format!("Purging {} failed: {}", layout.work_area(), e);
            warn!("{}", message);
            report.warnings.push(message);
        }
    }

    commit(storage, &layout, &config.job_id, JobKind::Postprocess, &report.outputs).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::storage::MemoryBackend;

    fn config() -> PipelineConfig {
        PipelineConfig::new("job-7", "/unused", "run/raw.csv")
    }

    async fn put_rows(store: &MemoryBackend, key: &str, rows: &str) {
        let body = format!("cycle_no,battery_name,qd\n{}", rows);
        store.put(key, Bytes::from(body)).await.unwrap();
    }

    #[tokio::test]
    async fn test_actual_before_past_is_domain_error() {
        let store = MemoryBackend::new();
        put_rows(&store, "run/tmp/actual/b1c0.csv", "5,b1c0,0.95\n").await;

        let cfg = config();
        let mut stage = MetricsStage::new(&store, &cfg);
        let err = stage.compute_segment(Segment::Actual).await.unwrap_err();
        assert!(matches!(err, PipelineError::Domain(_)));
    }

    #[tokio::test]
    async fn test_past_twice_is_rejected() {
        let store = MemoryBackend::new();
        put_rows(&store, "run/tmp/past/b1c0.csv", "1,b1c0,1.0\n").await;

        let cfg = config();
        let mut stage = MetricsStage::new(&store, &cfg);
        stage.compute_segment(Segment::Past).await.unwrap();
        assert!(stage.compute_segment(Segment::Past).await.is_err());
    }

    #[tokio::test]
    async fn test_baseline_flows_into_later_segments() {
        let store = MemoryBackend::new();
        put_rows(&store, "run/tmp/past/b1c0.csv", "1,b1c0,1.0\n2,b1c0,0.99\n").await;
        put_rows(&store, "run/tmp/actual/b1c0.csv", "5,b1c0,0.95\n").await;

        let cfg = config();
        let mut stage = MetricsStage::new(&store, &cfg);
        let past = stage.compute_segment(Segment::Past).await.unwrap();
        assert_eq!(past[0].rul, 100.0);
        assert_eq!(past[0].soh, 100.0);

        let actual = stage.compute_segment(Segment::Actual).await.unwrap();
        assert_eq!(actual.len(), 1);
        assert!((actual[0].soh - 95.0).abs() < 1e-9);
        assert!((actual[0].rul - 66.67).abs() < 1e-9);
        assert_eq!(actual[0].battery_id, "b1");
    }

    #[tokio::test]
    async fn test_process_segment_writes_plot_files() {
        let store = MemoryBackend::new();
        put_rows(&store, "run/tmp/past/b1c0.csv", "1,b1c0,1.0\n5,b1c0,0.95\n").await;

        let cfg = config();
        let mut stage = MetricsStage::new(&store, &cfg);
        let (_, report) = stage.process_segment(Segment::Past).await.unwrap();

        assert_eq!(report.renamed, vec!["run/plot/past/b1.csv"]);
        let data = store.get("run/plot/past/b1.csv").await.unwrap();
        let text = String::from_utf8(data.to_vec()).unwrap();
        assert_eq!(
            text,
            "cycle,soh,rul,capacity_reading,battery_id\n1,100.00,100.00,1.0,b1\n5,95.00,66.67,0.95,b1\n"
        );
    }

    #[tokio::test]
    async fn test_prepare_failure_writes_nothing() {
        let store = MemoryBackend::new();
        let mut raw = String::from("battery_name,cycle_no,qd\n");
        for cycle in 1..=130 {
            // b1c1 skips cycle 120 inside the test window
            raw.push_str(&format!("b1c0,{},1.0\n", cycle));
            if cycle != 120 {
                raw.push_str(&format!("b1c1,{},1.0\n", cycle));
            }
        }
        store.put("run/raw.csv", Bytes::from(raw)).await.unwrap();

        let mut cfg = config();
        cfg.data_checkpoint = Some(100);
        let err = run_prepare(&store, &cfg).await.unwrap_err();

        assert!(matches!(err, PipelineError::IncompleteWindow { expected: 60, actual: 59 }));
        assert_eq!(store.keys(), vec!["run/raw.csv"]);
    }
}
