//! Offline dataset IO and the deterministic train/test split.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::features::FeatureRecord;
use crate::schema::{RawRecord, RawValue};

pub const DEFAULT_TEST_SIZE: f64 = 0.25;
pub const DEFAULT_SPLIT_SEED: u64 = 42;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{path} has no header row")]
    MissingHeader { path: PathBuf },
    #[error("row {row} has {found} columns, expected {expected}")]
    InvalidRecordColumns {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("test size must be in (0, 1), got {0}")]
    InvalidTestSize(f64),
    #[error("cannot split {rows} rows with test size {test_size}")]
    TooFewRows { rows: usize, test_size: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    pub test_size: f64,
    pub seed: u64,
    pub data_root: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_size: DEFAULT_TEST_SIZE,
            seed: DEFAULT_SPLIT_SEED,
            data_root: PathBuf::from("data"),
            models_dir: PathBuf::from("models"),
        }
    }
}

impl SplitConfig {
    pub fn raw_path(&self) -> PathBuf {
        self.data_root.join("raw").join("swiggy.csv")
    }

    pub fn cleaned_path(&self) -> PathBuf {
        self.data_root.join("cleaned").join("swiggy_cleaned.csv")
    }

    pub fn train_path(&self) -> PathBuf {
        self.data_root.join("interim").join("train.csv")
    }

    pub fn test_path(&self) -> PathBuf {
        self.data_root.join("interim").join("test.csv")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_root.join("processed")
    }

    pub fn preprocessor_path(&self) -> PathBuf {
        self.models_dir.join("preprocessor.json")
    }

    /// Exported tree ensemble for `model`, e.g. `models/catboost_model.json`.
    pub fn exported_model_path(&self, model: &str) -> PathBuf {
        self.models_dir.join(format!("{model}_model.json"))
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.models_dir.join("model_bundle.json")
    }
}

pub fn split_config_from_env() -> Result<SplitConfig, ConfigError> {
    let mut config = SplitConfig::default();

    if let Ok(raw) = env::var("ETA_TEST_SIZE") {
        config.test_size = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| *value > 0.0 && *value < 1.0)
            .ok_or(ConfigError::InvalidEnv {
                key: "ETA_TEST_SIZE",
                value: raw.clone(),
            })?;
    }

    if let Ok(raw) = env::var("ETA_SPLIT_SEED") {
        config.seed = raw.trim().parse::<u64>().map_err(|_| ConfigError::InvalidEnv {
            key: "ETA_SPLIT_SEED",
            value: raw.clone(),
        })?;
    }

    if let Ok(raw) = env::var("ETA_DATA_ROOT") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.data_root = PathBuf::from(trimmed);
        }
    }

    if let Ok(raw) = env::var("ETA_MODELS_DIR") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.models_dir = PathBuf::from(trimmed);
        }
    }

    Ok(config)
}

/// Reads a headered CSV into raw records. Every cell is kept as text; missing
/// tokens are resolved later by the pipeline.
pub fn read_raw_records(path: &Path) -> Result<Vec<RawRecord>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(DatasetError::MissingHeader {
            path: path.to_path_buf(),
        });
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        rows.push(parse_raw_record(&headers, &record, idx)?);
    }

    info!(
        component = "dataset",
        event = "dataset.raw.loaded",
        path = %path.display(),
        rows = rows.len(),
        columns = headers.len()
    );

    Ok(rows)
}

fn parse_raw_record(
    headers: &StringRecord,
    record: &StringRecord,
    idx: usize,
) -> Result<RawRecord, DatasetError> {
    if record.len() != headers.len() {
        return Err(DatasetError::InvalidRecordColumns {
            row: idx,
            found: record.len(),
            expected: headers.len(),
        });
    }

    Ok(RawRecord::from_pairs(
        headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name, RawValue::text(value))),
    ))
}

pub fn read_feature_records(path: &Path) -> Result<Vec<FeatureRecord>, DatasetError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for row in reader.deserialize::<FeatureRecord>() {
        rows.push(row?);
    }

    info!(
        component = "dataset",
        event = "dataset.features.loaded",
        path = %path.display(),
        rows = rows.len()
    );

    Ok(rows)
}

pub fn write_feature_records(path: &Path, rows: &[FeatureRecord]) -> Result<(), DatasetError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a dense numeric matrix with a header row.
pub fn write_matrix_csv(
    path: &Path,
    header: &[String],
    rows: &[Vec<f64>],
) -> Result<(), DatasetError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row.iter().map(|value| value.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainTestSplit<T> {
    pub train: Vec<T>,
    pub test: Vec<T>,
}

/// Seeded split: row indices are shuffled with `StdRng::seed_from_u64(seed)`
/// and the first `ceil(n * test_size)` go to test. Relative order is kept
/// inside each side.
pub fn split_train_test<T: Clone>(
    rows: &[T],
    cfg: &SplitConfig,
) -> Result<TrainTestSplit<T>, DatasetError> {
    if !(cfg.test_size > 0.0 && cfg.test_size < 1.0) {
        return Err(DatasetError::InvalidTestSize(cfg.test_size));
    }

    let test_rows = (rows.len() as f64 * cfg.test_size).ceil() as usize;
    if test_rows == 0 || test_rows >= rows.len() {
        return Err(DatasetError::TooFewRows {
            rows: rows.len(),
            test_size: cfg.test_size,
        });
    }

    let mut indices: Vec<usize> = (0..rows.len()).collect();
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    indices.shuffle(&mut rng);

    let mut is_test = vec![false; rows.len()];
    for idx in indices.iter().take(test_rows) {
        is_test[*idx] = true;
    }

    let mut split = TrainTestSplit {
        train: Vec::with_capacity(rows.len() - test_rows),
        test: Vec::with_capacity(test_rows),
    };
    for (row, test) in rows.iter().zip(is_test) {
        if test {
            split.test.push(row.clone());
        } else {
            split.train.push(row.clone());
        }
    }

    if split.train.len() < split.test.len() {
        warn!(
            component = "dataset",
            event = "dataset.split.test_heavy",
            train_rows = split.train.len(),
            test_rows = split.test.len()
        );
    }

    info!(
        component = "dataset",
        event = "dataset.split.done",
        seed = cfg.seed,
        test_size = cfg.test_size,
        train_rows = split.train.len(),
        test_rows = split.test.len()
    );

    Ok(split)
}
