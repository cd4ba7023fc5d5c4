pub mod pipeline_config;
