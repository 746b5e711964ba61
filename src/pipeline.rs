//! Cleaning pipeline orchestration shared by the offline and online paths.
//!
//! Fixed order: normalize names, filter by policy, canonicalize, derive
//! temporal and geo features, prune to the feature columns and drop rows with
//! any unresolved column. Batch callers get the surviving rows plus a
//! [`CleaningReport`]; single-record callers get a [`CleanOutcome`] that is
//! either a feature row or a labeled rejection, never a silent empty result.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::canonical::{Canonicalizer, MalformedField};
use crate::config::{ConfigError, PipelineConfig};
use crate::features::{build_feature_schema, FeatureColumn, FeatureRecord, FeatureSchema};
use crate::filter::{Exclusion, RowFilter};
use crate::geo::derive_geo;
use crate::schema::{RawRecord, SchemaNormalizer};
use crate::sink::{FeatureSink, SinkError};
use crate::temporal::derive_temporal;

const TARGET_FIELD: &str = "time_taken";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    Excluded { exclusion: Exclusion },
    Malformed { field: MalformedField },
    Unresolved { column: FeatureColumn },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Excluded { exclusion } => exclusion.code(),
            Self::Malformed { .. } => "malformed_field",
            Self::Unresolved { .. } => "unresolved_field",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excluded {
                exclusion: Exclusion::Underage { age },
            } => write!(f, "rider age {age} is below the minimum"),
            Self::Excluded {
                exclusion: Exclusion::InvalidRating { rating },
            } => write!(f, "rider rating '{rating}' is not a valid rating"),
            Self::Malformed { field } => write!(f, "{field}"),
            Self::Unresolved { column } => {
                write!(f, "column {} has no value after cleaning", column.as_str())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CleanOutcome {
    Cleaned(FeatureRecord),
    Rejected(Rejection),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub excluded_underage: u64,
    pub excluded_invalid_rating: u64,
    pub malformed_rows: u64,
    pub unresolved_rows: u64,
    pub has_target: bool,
    pub first_error: Option<String>,
}

impl CleaningReport {
    pub fn dropped_rows(&self) -> u64 {
        self.input_rows - self.output_rows
    }

    fn record(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::Excluded {
                exclusion: Exclusion::Underage { .. },
            } => self.excluded_underage += 1,
            Rejection::Excluded {
                exclusion: Exclusion::InvalidRating { .. },
            } => self.excluded_invalid_rating += 1,
            Rejection::Malformed { .. } => {
                self.malformed_rows += 1;
                if self.first_error.is_none() {
                    self.first_error = Some(rejection.to_string());
                }
            }
            Rejection::Unresolved { .. } => self.unresolved_rows += 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum CleaningError {
    #[error("no input rows to clean")]
    NoInput,
    #[error("no valid rows: all {} input rows were dropped", .report.input_rows)]
    EmptyResult { report: CleaningReport },
    #[error("feature sink failed: {0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone)]
pub struct CleaningPipeline {
    config: PipelineConfig,
    normalizer: SchemaNormalizer,
    filter: RowFilter,
    canonicalizer: Canonicalizer,
    schema: FeatureSchema,
}

impl CleaningPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            normalizer: SchemaNormalizer::new(&config),
            filter: RowFilter::new(&config),
            canonicalizer: Canonicalizer::new(&config),
            schema: build_feature_schema(&config),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Cleans a batch; per-row failures are counted, never fatal.
    ///
    /// The target column is required on every row when any row carries it.
    pub fn clean_batch(
        &self,
        records: &[RawRecord],
    ) -> Result<(Vec<FeatureRecord>, CleaningReport), CleaningError> {
        if records.is_empty() {
            return Err(CleaningError::NoInput);
        }

        info!(
            component = "pipeline",
            event = "cleaning.batch.start",
            input_rows = records.len()
        );

        let normalized: Vec<RawRecord> = records
            .iter()
            .map(|record| self.normalizer.normalize(record))
            .collect();
        let has_target = normalized.iter().any(|record| record.contains(TARGET_FIELD));

        let mut report = CleaningReport {
            input_rows: records.len() as u64,
            has_target,
            ..CleaningReport::default()
        };

        let plan = self.filter.plan(&normalized);
        for exclusion in plan.values() {
            report.record(&Rejection::Excluded {
                exclusion: exclusion.clone(),
            });
        }

        let mut rows = Vec::with_capacity(normalized.len() - plan.len());
        for (row_index, record) in self.filter.retain(&normalized, &plan) {
            match self.derive_row(&record, has_target) {
                Ok(row) => rows.push(row),
                Err(rejection) => {
                    debug!(
                        component = "pipeline",
                        event = "cleaning.row.rejected",
                        row_index,
                        reason = rejection.code(),
                        detail = %rejection
                    );
                    report.record(&rejection);
                }
            }
        }

        report.output_rows = rows.len() as u64;
        if report.malformed_rows > 0 {
            warn!(
                component = "pipeline",
                event = "cleaning.batch.malformed_rows",
                malformed_rows = report.malformed_rows,
                first_error = report.first_error.as_deref().unwrap_or_default()
            );
        }

        info!(
            component = "pipeline",
            event = "cleaning.batch.finish",
            input_rows = report.input_rows,
            output_rows = report.output_rows,
            excluded_underage = report.excluded_underage,
            excluded_invalid_rating = report.excluded_invalid_rating,
            malformed_rows = report.malformed_rows,
            unresolved_rows = report.unresolved_rows,
            has_target = report.has_target
        );

        if rows.is_empty() {
            warn!(
                component = "pipeline",
                event = "cleaning.batch.empty_result",
                input_rows = report.input_rows
            );
            return Err(CleaningError::EmptyResult { report });
        }

        Ok((rows, report))
    }

    /// Cleans a batch and hands the rows to `sink`.
    pub fn clean_batch_into(
        &self,
        records: &[RawRecord],
        sink: &mut dyn FeatureSink,
    ) -> Result<CleaningReport, CleaningError> {
        let (rows, report) = self.clean_batch(records)?;
        sink.accept(&self.schema, &rows, &report)?;
        Ok(report)
    }

    /// Cleans one record for the online path. The target is never required.
    pub fn clean_single(&self, record: &RawRecord) -> CleanOutcome {
        let normalized = self.normalizer.normalize(record);

        if let Some(exclusion) = self.filter.check(&normalized) {
            return CleanOutcome::Rejected(Rejection::Excluded { exclusion });
        }

        let kept = self.filter.strip_id(normalized);
        match self.derive_row(&kept, false) {
            Ok(row) => CleanOutcome::Cleaned(row),
            Err(rejection) => CleanOutcome::Rejected(rejection),
        }
    }

    fn derive_row(&self, record: &RawRecord, require_target: bool) -> Result<FeatureRecord, Rejection> {
        let canonical = self
            .canonicalizer
            .canonicalize(record)
            .map_err(|field| Rejection::Malformed { field })?;
        let temporal = derive_temporal(&canonical, &self.config.time_of_day_bins);
        let geo = derive_geo(
            &canonical,
            &self.config.distance_bins,
            self.config.earth_radius_km,
        );

        FeatureRecord::assemble(canonical, temporal, geo, require_target)
            .map_err(|column| Rejection::Unresolved { column })
    }
}
