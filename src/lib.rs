// Battery health pipeline
// Main library entry point

pub mod core;
pub mod models;

// Re-export main types
pub use crate::core::error::{PipelineError, Result};
pub use crate::core::format::{CycleRecord, MetricsRecord, Segment, TimeSeriesDataset};
pub use crate::core::metrics::RulModel;
pub use crate::core::pipeline::{run_postprocess, run_prepare, MetricsStage};
pub use crate::core::storage::{LocalBackend, MemoryBackend, StorageBackend};
pub use crate::core::time_codec::TimeCodec;
pub use crate::models::pipeline_config::PipelineConfig;
