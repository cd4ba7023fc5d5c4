// Pipeline constants

// Reference year for the cycle <-> calendar mapping (cycle 1 == Jan 1)
pub const INIT_YEAR: i32 = 2000;

// Forecaster expects yyyy-MM-dd HH:mm:ss
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DEFAULT_FORECAST_HORIZON: u32 = 30;
pub const DEFAULT_CELLS_PER_BATTERY: usize = 5;
pub const DEFAULT_BATTERY_PREFIX_LEN: usize = 2;

// Only this fraction of cells has a lower cycle_life than the derived checkpoint
pub const DEFAULT_QUANTILE_CUTOFF: f64 = 0.5;

// A cell is dead once capacity falls to 80% of its baseline
pub const DEAD_CAPACITY_FRACTION: f64 = 0.8;

pub const MAX_PERCENT: f64 = 100.0;

// Raw dataset columns
pub const COL_CELL: &str = "battery_name";
pub const COL_CYCLE: &str = "cycle_no";
pub const COL_DATE: &str = "date";
pub const COL_CAPACITY: &str = "qd";
pub const COL_CYCLE_LIFE: &str = "cycle_life";

// Forecast export columns
pub const COL_ITEM_ID: &str = "item_id";
pub const COL_P50: &str = "p50";

// Output layout
pub const WORK_DIR: &str = "tmp";
pub const PLOT_DIR: &str = "plot";
pub const JOBS_DIR: &str = "_jobs";
pub const FORECAST_EXPORT_DIR: &str = "forecast_export";
pub const TRAIN_FILE: &str = "train_dataset";
pub const TEST_FILE: &str = "test_dataset";
pub const TEST_IDS_FILE: &str = "test_ids";

// Staging key used when a single flat file goes through the partitioned writer
pub const FLAT_PARTITION_KEY: &str = "dataset";
pub const PLOT_PARTITION_KEY: &str = "batt";

pub const CSV_EXTENSION: &str = ".csv";
pub const PART_FILE_PREFIX: &str = "part-";
