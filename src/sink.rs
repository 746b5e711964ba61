//! Destinations for cleaned feature rows.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::features::{FeatureRecord, FeatureSchema};
use crate::pipeline::CleaningReport;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait FeatureSink {
    fn accept(
        &mut self,
        schema: &FeatureSchema,
        rows: &[FeatureRecord],
        report: &CleaningReport,
    ) -> Result<(), SinkError>;
}

/// Keeps the last accepted batch in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    pub schema: Option<FeatureSchema>,
    pub rows: Vec<FeatureRecord>,
    pub report: Option<CleaningReport>,
}

impl FeatureSink for InMemorySink {
    fn accept(
        &mut self,
        schema: &FeatureSchema,
        rows: &[FeatureRecord],
        report: &CleaningReport,
    ) -> Result<(), SinkError> {
        self.schema = Some(schema.clone());
        self.rows = rows.to_vec();
        self.report = Some(report.clone());
        Ok(())
    }
}

/// Writes rows as CSV, header in `FeatureRecord` field order, plus a
/// `<name>.meta.json` sidecar holding the schema and the cleaning report.
#[derive(Debug, Clone)]
pub struct CsvFileSink {
    path: PathBuf,
}

#[derive(Serialize)]
struct SinkMetadata<'a> {
    schema: &'a FeatureSchema,
    report: &'a CleaningReport,
}

impl CsvFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_stem()
            .map(|stem| stem.to_os_string())
            .unwrap_or_default();
        name.push(".meta.json");
        self.path.with_file_name(name)
    }
}

impl FeatureSink for CsvFileSink {
    fn accept(
        &mut self,
        schema: &FeatureSchema,
        rows: &[FeatureRecord],
        report: &CleaningReport,
    ) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut writer = csv::Writer::from_path(&self.path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        let meta = serde_json::to_vec_pretty(&SinkMetadata { schema, report })?;
        fs::write(self.metadata_path(), meta)?;

        info!(
            component = "sink",
            event = "sink.csv.written",
            path = %self.path.display(),
            rows = rows.len(),
            fingerprint = %schema.fingerprint
        );

        Ok(())
    }
}
