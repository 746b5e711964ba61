//! Immutable configuration shared by every cleaning stage.
//!
//! Everything the pipeline treats as a business constant lives here: the
//! rename table, the recognized missing-value tokens, filter thresholds and
//! the bucket edges for derived categorical features. A configuration is
//! validated once when the pipeline is built; a bad configuration is a
//! startup failure, never a per-record one.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::DistanceType;
use crate::temporal::TimeOfDay;

pub const DEFAULT_MISSING_TOKENS: [&str; 7] = ["", "NaN", "NaN ", "nan", "NA", "na", "NAN"];

pub const DEFAULT_RENAME_TABLE: [(&str, &str); 11] = [
    ("delivery_person_id", "rider_id"),
    ("delivery_person_age", "age"),
    ("delivery_person_ratings", "ratings"),
    ("delivery_location_latitude", "delivery_latitude"),
    ("delivery_location_longitude", "delivery_longitude"),
    ("time_orderd", "order_time"),
    ("time_order_picked", "order_picked_time"),
    ("weatherconditions", "weather"),
    ("road_traffic_density", "traffic"),
    ("city", "city_type"),
    ("time_taken(min)", "time_taken"),
];

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Label type usable as a bucket output.
pub trait BinLabel: Copy {
    fn as_str(self) -> &'static str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinClosed {
    /// `[lo, hi)`
    Left,
    /// `(lo, hi]`
    Right,
}

/// Contiguous bins over `edges`; `labels[i]` covers `edges[i]..edges[i + 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bins<L> {
    pub edges: Vec<f64>,
    pub labels: Vec<L>,
    pub closed: BinClosed,
}

impl<L: BinLabel> Bins<L> {
    /// Returns `None` for values outside every bin (including NaN).
    pub fn assign(&self, value: f64) -> Option<L> {
        if !value.is_finite() {
            return None;
        }

        for (idx, window) in self.edges.windows(2).enumerate() {
            let (lo, hi) = (window[0], window[1]);
            let inside = match self.closed {
                BinClosed::Left => value >= lo && value < hi,
                BinClosed::Right => value > lo && value <= hi,
            };
            if inside {
                return Some(self.labels[idx]);
            }
        }

        None
    }

    fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        if self.edges.len() < 2 {
            return Err(ConfigError::InvalidBins {
                name,
                reason: "at least two edges are required".to_string(),
            });
        }
        if self.labels.len() + 1 != self.edges.len() {
            return Err(ConfigError::InvalidBins {
                name,
                reason: format!(
                    "{} edges need {} labels, got {}",
                    self.edges.len(),
                    self.edges.len() - 1,
                    self.labels.len()
                ),
            });
        }
        if self.edges.iter().any(|edge| !edge.is_finite()) {
            return Err(ConfigError::InvalidBins {
                name,
                reason: "edges must be finite".to_string(),
            });
        }
        if self.edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::InvalidBins {
                name,
                reason: "edges must be strictly increasing".to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn fingerprint_text(&self) -> String {
        let edges: Vec<String> = self.edges.iter().map(|e| e.to_string()).collect();
        let labels: Vec<&str> = self.labels.iter().map(|l| l.as_str()).collect();
        format!(
            "closed={:?};edges={};labels={}",
            self.closed,
            edges.join(","),
            labels.join(",")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRule {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub rename_table: Vec<RenameRule>,
    pub missing_tokens: Vec<String>,
    pub min_rider_age: f64,
    pub invalid_rating_literal: String,
    pub rider_city_delimiter: String,
    pub weather_prefix: String,
    pub weather_missing_literal: String,
    pub target_prefix: String,
    pub time_of_day_bins: Bins<TimeOfDay>,
    pub distance_bins: Bins<DistanceType>,
    pub earth_radius_km: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rename_table: DEFAULT_RENAME_TABLE
                .iter()
                .map(|(from, to)| RenameRule {
                    from: (*from).to_string(),
                    to: (*to).to_string(),
                })
                .collect(),
            missing_tokens: DEFAULT_MISSING_TOKENS
                .iter()
                .map(|token| (*token).to_string())
                .collect(),
            min_rider_age: 18.0,
            invalid_rating_literal: "6".to_string(),
            rider_city_delimiter: "RES".to_string(),
            weather_prefix: "conditions ".to_string(),
            weather_missing_literal: "nan".to_string(),
            target_prefix: "(min) ".to_string(),
            time_of_day_bins: Bins {
                edges: vec![0.0, 6.0, 12.0, 17.0, 20.0, 24.0],
                labels: TimeOfDay::ALL.to_vec(),
                closed: BinClosed::Right,
            },
            distance_bins: Bins {
                edges: vec![0.0, 5.0, 10.0, 15.0, 25.0],
                labels: DistanceType::ALL.to_vec(),
                closed: BinClosed::Left,
            },
            earth_radius_km: EARTH_RADIUS_KM,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name} bins: {reason}")]
    InvalidBins { name: &'static str, reason: String },
    #[error("invalid rename table: {0}")]
    InvalidRenameTable(String),
    #[error("missing-value token set must not be empty")]
    EmptyMissingTokens,
    #[error("invalid configuration value {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("blend weights must be in [0, 1] and sum to 1 (catboost={catboost}, lightgbm={lightgbm})")]
    InvalidBlendWeights { catboost: f64, lightgbm: f64 },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid environment variable {key}='{value}'")]
    InvalidEnv { key: &'static str, value: String },
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for rule in &self.rename_table {
            if rule.from.trim().is_empty() || rule.to.trim().is_empty() {
                return Err(ConfigError::InvalidRenameTable(
                    "rename rules must have non-empty source and target".to_string(),
                ));
            }
            if rule.from != rule.from.to_lowercase() {
                return Err(ConfigError::InvalidRenameTable(format!(
                    "source '{}' must be lower-case",
                    rule.from
                )));
            }
            if !sources.insert(rule.from.as_str()) {
                return Err(ConfigError::InvalidRenameTable(format!(
                    "duplicate source '{}'",
                    rule.from
                )));
            }
            if !targets.insert(rule.to.as_str()) {
                return Err(ConfigError::InvalidRenameTable(format!(
                    "duplicate target '{}'",
                    rule.to
                )));
            }
        }

        if self.missing_tokens.is_empty() {
            return Err(ConfigError::EmptyMissingTokens);
        }
        if !self.min_rider_age.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "min_rider_age",
                reason: "must be finite".to_string(),
            });
        }
        if self.rider_city_delimiter.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "rider_city_delimiter",
                reason: "must not be empty".to_string(),
            });
        }
        if !(self.earth_radius_km.is_finite() && self.earth_radius_km > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "earth_radius_km",
                reason: format!("must be > 0, got {}", self.earth_radius_km),
            });
        }

        self.time_of_day_bins.validate("time_of_day")?;
        self.distance_bins.validate("distance")?;
        Ok(())
    }

    pub fn is_missing_token(&self, raw: &str) -> bool {
        self.missing_tokens.iter().any(|token| token == raw)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Loads the file named by `ETA_PIPELINE_CONFIG`, or the defaults when unset.
pub fn pipeline_config_from_env() -> Result<PipelineConfig, ConfigError> {
    match env::var("ETA_PIPELINE_CONFIG") {
        Ok(path) if !path.trim().is_empty() => {
            PipelineConfig::from_json_file(Path::new(path.trim()))
        }
        _ => Ok(PipelineConfig::default()),
    }
}
