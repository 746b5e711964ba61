//! Weighted two-model ensemble, exported model bundle and evaluation metrics.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::ConfigError;
use crate::features::{assert_schema_compatible, FeatureRecord, FeatureSchema, SchemaError};
use crate::preprocess::{PreprocessError, Preprocessor};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;
const BLEND_GRID_STEPS: u32 = 20;

pub const DEFAULT_MODEL_NAME: &str = "delivery-eta-ensemble";

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("model expects {expected} features, got {found}")]
    FeatureCount { expected: usize, found: usize },
    #[error("model produced a non-finite prediction")]
    NonFinite,
    #[error("tree walk broke at node {node}")]
    BrokenTree { node: usize },
    #[error("metric inputs differ in length: {actual} actual vs {predicted} predicted")]
    LengthMismatch { actual: usize, predicted: usize },
    #[error("metric inputs are empty")]
    EmptyInput,
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read model bundle {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model bundle {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write model bundle {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode model bundle: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("invalid preprocessor: {0}")]
    Preprocessor(#[from] PreprocessError),
    #[error("invalid {model} model: {reason}")]
    InvalidModel { model: &'static str, reason: String },
    #[error("bundle is incompatible with the live pipeline: {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Deserialize)]
struct BlendWeightsRepr {
    catboost: f64,
    lightgbm: f64,
}

/// Validated blend pair: both finite, in `[0, 1]`, summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BlendWeightsRepr")]
pub struct BlendWeights {
    catboost: f64,
    lightgbm: f64,
}

impl BlendWeights {
    pub fn new(catboost: f64, lightgbm: f64) -> Result<Self, ConfigError> {
        let in_unit = |w: f64| w.is_finite() && (0.0..=1.0).contains(&w);
        if !(in_unit(catboost)
            && in_unit(lightgbm)
            && (catboost + lightgbm - 1.0).abs() <= WEIGHT_SUM_TOLERANCE)
        {
            return Err(ConfigError::InvalidBlendWeights { catboost, lightgbm });
        }
        Ok(Self { catboost, lightgbm })
    }

    pub fn from_catboost(catboost: f64) -> Result<Self, ConfigError> {
        Self::new(catboost, 1.0 - catboost)
    }

    pub fn catboost(&self) -> f64 {
        self.catboost
    }

    pub fn lightgbm(&self) -> f64 {
        self.lightgbm
    }

    pub fn blend(&self, catboost: f64, lightgbm: f64) -> f64 {
        self.catboost * catboost + self.lightgbm * lightgbm
    }
}

impl TryFrom<BlendWeightsRepr> for BlendWeights {
    type Error = ConfigError;

    fn try_from(repr: BlendWeightsRepr) -> Result<Self, Self::Error> {
        Self::new(repr.catboost, repr.lightgbm)
    }
}

pub trait Regressor: Send + Sync {
    fn predict(&self, features: &[f64]) -> Result<f64, PredictError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNode {
    /// `features[feature] <= threshold` goes left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match *node {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature >= n_features {
                        return Err(format!("node {idx} splits on feature {feature} of {n_features}"));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {idx} has a non-finite threshold"));
                    }
                    // children strictly after the parent rules out cycles
                    for child in [left, right] {
                        if child <= idx || child >= self.nodes.len() {
                            return Err(format!("node {idx} has invalid child {child}"));
                        }
                    }
                }
                TreeNode::Leaf { value } => {
                    if !value.is_finite() {
                        return Err(format!("leaf {idx} has a non-finite value"));
                    }
                }
            }
        }
        Ok(())
    }

    /// A well-formed walk visits each node at most once; anything longer is a cycle.
    fn leaf_value(&self, features: &[f64]) -> Result<f64, PredictError> {
        let mut idx = 0;
        for _ in 0..self.nodes.len() {
            match self.nodes.get(idx) {
                Some(TreeNode::Leaf { value }) => return Ok(*value),
                Some(TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = features
                        .get(*feature)
                        .ok_or(PredictError::BrokenTree { node: idx })?;
                    idx = if *value <= *threshold { *left } else { *right };
                }
                None => break,
            }
        }
        Err(PredictError::BrokenTree { node: idx })
    }
}

/// Additive tree ensemble: `base_score + sum(tree leaves)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsembleRegressor {
    pub n_features: usize,
    pub base_score: f64,
    pub trees: Vec<RegressionTree>,
}

impl TreeEnsembleRegressor {
    pub fn validate(&self) -> Result<(), String> {
        if !self.base_score.is_finite() {
            return Err("base score is not finite".to_string());
        }
        for (idx, tree) in self.trees.iter().enumerate() {
            tree.validate(self.n_features)
                .map_err(|reason| format!("tree {idx}: {reason}"))?;
        }
        Ok(())
    }
}

impl Regressor for TreeEnsembleRegressor {
    fn predict(&self, features: &[f64]) -> Result<f64, PredictError> {
        if features.len() != self.n_features {
            return Err(PredictError::FeatureCount {
                expected: self.n_features,
                found: features.len(),
            });
        }
        let mut value = self.base_score;
        for tree in &self.trees {
            value += tree.leaf_value(features)?;
        }
        if !value.is_finite() {
            return Err(PredictError::NonFinite);
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub minutes: f64,
    pub catboost: f64,
    pub lightgbm: f64,
}

#[derive(Clone)]
pub struct EnsemblePredictor {
    preprocessor: Preprocessor,
    catboost: Arc<dyn Regressor>,
    lightgbm: Arc<dyn Regressor>,
    weights: BlendWeights,
}

impl EnsemblePredictor {
    pub fn new(
        preprocessor: Preprocessor,
        catboost: Arc<dyn Regressor>,
        lightgbm: Arc<dyn Regressor>,
        weights: BlendWeights,
    ) -> Self {
        Self {
            preprocessor,
            catboost,
            lightgbm,
            weights,
        }
    }

    pub fn weights(&self) -> BlendWeights {
        self.weights
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn predict(&self, row: &FeatureRecord) -> Result<Prediction, PredictError> {
        let features = self.preprocessor.transform(row)?;
        self.predict_features(&features)
    }

    pub fn predict_features(&self, features: &[f64]) -> Result<Prediction, PredictError> {
        let catboost = self.catboost.predict(features)?;
        let lightgbm = self.lightgbm.predict(features)?;
        Ok(Prediction {
            minutes: self.weights.blend(catboost, lightgbm),
            catboost,
            lightgbm,
        })
    }
}

/// Exported preprocessor, both models and blend weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model_name: String,
    pub version: String,
    pub schema_version: u32,
    pub schema_fingerprint: String,
    pub preprocessor: Preprocessor,
    pub catboost: TreeEnsembleRegressor,
    pub lightgbm: TreeEnsembleRegressor,
    pub weights: BlendWeights,
}

impl ModelBundle {
    /// Packs the fitted artifacts under the live pipeline's schema stamp.
    ///
    /// The result passes `check_schema` against `schema`.
    pub fn assemble(
        model_name: impl Into<String>,
        version: impl Into<String>,
        schema: &FeatureSchema,
        preprocessor: Preprocessor,
        catboost: TreeEnsembleRegressor,
        lightgbm: TreeEnsembleRegressor,
        weights: BlendWeights,
    ) -> Result<Self, BundleError> {
        let bundle = Self {
            model_name: model_name.into(),
            version: version.into(),
            schema_version: schema.version,
            schema_fingerprint: schema.fingerprint.clone(),
            preprocessor,
            catboost,
            lightgbm,
            weights,
        };
        bundle.validate()?;
        Ok(bundle)
    }

    pub fn write_to_path(&self, path: &Path) -> Result<(), BundleError> {
        let write_err = |source: std::io::Error| BundleError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let encoded = serde_json::to_vec_pretty(self).map_err(BundleError::Encode)?;
        fs::write(path, encoded).map_err(write_err)?;

        info!(
            component = "ensemble",
            event = "bundle.written",
            path = %path.display(),
            model_name = %self.model_name,
            version = %self.version,
            schema_fingerprint = %self.schema_fingerprint
        );

        Ok(())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, BundleError> {
        let raw = fs::read_to_string(path).map_err(|source| BundleError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let bundle: Self = serde_json::from_str(&raw).map_err(|source| BundleError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        bundle.validate()?;

        info!(
            component = "ensemble",
            event = "bundle.loaded",
            path = %path.display(),
            model_name = %bundle.model_name,
            version = %bundle.version,
            features = bundle.preprocessor.output_width()
        );

        Ok(bundle)
    }

    pub fn validate(&self) -> Result<(), BundleError> {
        self.preprocessor.validate()?;
        let width = self.preprocessor.output_width();
        for (model, regressor) in [("catboost", &self.catboost), ("lightgbm", &self.lightgbm)] {
            if regressor.n_features != width {
                return Err(BundleError::InvalidModel {
                    model,
                    reason: format!(
                        "expects {} features, preprocessor emits {width}",
                        regressor.n_features
                    ),
                });
            }
            regressor
                .validate()
                .map_err(|reason| BundleError::InvalidModel { model, reason })?;
        }
        Ok(())
    }

    /// Refuses bundles trained against a different cleaning configuration.
    pub fn check_schema(&self, live: &FeatureSchema) -> Result<(), BundleError> {
        assert_schema_compatible(self.schema_version, &self.schema_fingerprint, live)?;
        Ok(())
    }

    pub fn predictor(&self) -> EnsemblePredictor {
        EnsemblePredictor::new(
            self.preprocessor.clone(),
            Arc::new(self.catboost.clone()),
            Arc::new(self.lightgbm.clone()),
            self.weights,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    /// Absolute train/test differences, used as the overfitting check.
    pub fn gap(&self, other: &RegressionMetrics) -> RegressionMetrics {
        RegressionMetrics {
            mae: (self.mae - other.mae).abs(),
            rmse: (self.rmse - other.rmse).abs(),
            r2: (self.r2 - other.r2).abs(),
        }
    }
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> Result<f64, PredictError> {
    check_lengths(actual, predicted)?;
    let total: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum();
    Ok(total / actual.len() as f64)
}

pub fn regression_metrics(actual: &[f64], predicted: &[f64]) -> Result<RegressionMetrics, PredictError> {
    let mae = mean_absolute_error(actual, predicted)?;
    let n = actual.len() as f64;

    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    let mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();

    let r2 = if ss_tot == 0.0 {
        if ss_res == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    };

    Ok(RegressionMetrics {
        mae,
        rmse: (ss_res / n).sqrt(),
        r2,
    })
}

fn check_lengths(actual: &[f64], predicted: &[f64]) -> Result<(), PredictError> {
    if actual.len() != predicted.len() {
        return Err(PredictError::LengthMismatch {
            actual: actual.len(),
            predicted: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(PredictError::EmptyInput);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendCandidate {
    pub catboost: f64,
    pub lightgbm: f64,
    pub mae: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendSearchResult {
    pub best: BlendWeights,
    pub best_mae: f64,
    pub candidates: Vec<BlendCandidate>,
}

/// Grid search of the catboost weight over 0.00..=1.00 in 0.05 steps,
/// minimizing MAE. Ties keep the smaller catboost weight.
pub fn search_blend_weights(
    actual: &[f64],
    catboost: &[f64],
    lightgbm: &[f64],
) -> Result<BlendSearchResult, PredictError> {
    check_lengths(actual, catboost)?;
    check_lengths(actual, lightgbm)?;

    let mut candidates = Vec::with_capacity(BLEND_GRID_STEPS as usize + 1);
    let mut best: Option<(BlendWeights, f64)> = None;

    for step in 0..=BLEND_GRID_STEPS {
        let w_cat = f64::from(step) / f64::from(BLEND_GRID_STEPS);
        let weights = BlendWeights {
            catboost: w_cat,
            lightgbm: 1.0 - w_cat,
        };
        let blended: Vec<f64> = catboost
            .iter()
            .zip(lightgbm)
            .map(|(c, l)| weights.blend(*c, *l))
            .collect();
        let mae = mean_absolute_error(actual, &blended)?;

        debug!(
            component = "ensemble",
            event = "blend.search.candidate",
            w_cat = weights.catboost,
            w_lgb = weights.lightgbm,
            mae
        );

        candidates.push(BlendCandidate {
            catboost: weights.catboost,
            lightgbm: weights.lightgbm,
            mae,
        });
        if best.map_or(true, |(_, best_mae)| mae < best_mae) {
            best = Some((weights, mae));
        }
    }

    let (best, best_mae) = best.ok_or(PredictError::EmptyInput)?;
    info!(
        component = "ensemble",
        event = "blend.search.done",
        w_cat = best.catboost,
        w_lgb = best.lightgbm,
        mae = best_mae
    );

    Ok(BlendSearchResult {
        best,
        best_mae,
        candidates,
    })
}
