// Core pipeline stages

pub mod baseline;
pub mod constants;
pub mod csv_io;
pub mod error;
pub mod format;
pub mod metrics;
pub mod normalizer;
pub mod pipeline;
pub mod sampler;
pub mod splitter;
pub mod storage;
pub mod time_codec;
