use std::path::Path;
use std::sync::OnceLock;
use tokio::fs;
use tracing::info;

use battery_pipeline::PipelineConfig;

static CONFIG_CACHE: OnceLock<PipelineConfig> = OnceLock::new();

/// Overrides taken from the command line, applied on top of the file.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub job_id: Option<String>,
    pub checkpoint: Option<u32>,
}

pub async fn init_config(path: &Path, overrides: ConfigOverrides) -> anyhow::Result<&'static PipelineConfig> {
    let data = fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("File read Error: {e} {}", path.display()))?;

    let mut config: PipelineConfig = serde_json::from_str(&data)
        .map_err(|e| anyhow::anyhow!("JSON Parse Error: {e}"))?;

    if let Some(job_id) = overrides.job_id {
        config.job_id = job_id;
    }
    if let Some(checkpoint) = overrides.checkpoint {
        config.data_checkpoint = Some(checkpoint);
    }

    config.validate()?;

    info!(
        "Config loaded for job {} (horizon {}, model {:?}, sampling {})",
        config.job_id, config.forecast_horizon, config.rul_model, config.sampling.enabled
    );

    CONFIG_CACHE
        .set(config)
        .map_err(|_| anyhow::anyhow!("Config already initialized"))?;

    CONFIG_CACHE
        .get()
        .ok_or_else(|| anyhow::anyhow!("Config not initialized"))
}
