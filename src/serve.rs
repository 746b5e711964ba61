//! HTTP serving boundary: one raw record in, one blended ETA out.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::ConfigError;
use crate::ensemble::{BundleError, EnsemblePredictor, ModelBundle, PredictError};
use crate::pipeline::{CleanOutcome, CleaningPipeline, Rejection};
use crate::schema::RawRecord;

pub const DEFAULT_SERVE_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_MODEL_BUNDLE: &str = "models/model_bundle.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    pub bundle_path: PathBuf,
}

pub fn service_config_from_env() -> Result<ServiceConfig, ConfigError> {
    let raw_addr = env::var("ETA_SERVE_ADDR").unwrap_or_else(|_| DEFAULT_SERVE_ADDR.to_string());
    let bind_addr = raw_addr
        .trim()
        .parse::<SocketAddr>()
        .map_err(|_| ConfigError::InvalidEnv {
            key: "ETA_SERVE_ADDR",
            value: raw_addr.clone(),
        })?;

    let bundle_path = env::var("ETA_MODEL_BUNDLE")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| DEFAULT_MODEL_BUNDLE.to_string());

    Ok(ServiceConfig {
        bind_addr,
        bundle_path: PathBuf::from(bundle_path),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightsView {
    pub catboost: f64,
    pub lightgbm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predicted_time_minutes: f64,
    pub model_version_used: String,
    pub weights: WeightsView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub message: String,
    pub model_name: String,
    pub latest_model_version: String,
    pub schema_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub reason: String,
    pub detail: String,
}

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("request body is not a valid record: {0}")]
    InvalidBody(String),
    #[error("input rejected: {0}")]
    Rejected(Rejection),
    #[error("prediction failed: {0}")]
    Predict(#[from] PredictError),
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::InvalidBody(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: "invalid_input".to_string(),
                    reason: "malformed_body".to_string(),
                    detail: detail.clone(),
                },
            ),
            Self::Rejected(rejection) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    error: "invalid_input".to_string(),
                    reason: rejection.code().to_string(),
                    detail: rejection.to_string(),
                },
            ),
            Self::Predict(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: "prediction_failed".to_string(),
                    reason: "model_error".to_string(),
                    detail: err.to_string(),
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Cleaning pipeline plus the loaded ensemble; shared read-only across requests.
#[derive(Clone)]
pub struct PredictionService {
    pipeline: CleaningPipeline,
    predictor: EnsemblePredictor,
    model_name: String,
    model_version: String,
}

impl PredictionService {
    pub fn new(
        pipeline: CleaningPipeline,
        predictor: EnsemblePredictor,
        model_name: impl Into<String>,
        model_version: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            predictor,
            model_name: model_name.into(),
            model_version: model_version.into(),
        }
    }

    /// Fails when the bundle was produced under a different feature schema.
    pub fn from_bundle(pipeline: CleaningPipeline, bundle: &ModelBundle) -> Result<Self, BundleError> {
        bundle.check_schema(pipeline.schema())?;
        Ok(Self::new(
            pipeline,
            bundle.predictor(),
            bundle.model_name.clone(),
            bundle.version.clone(),
        ))
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            message: "delivery ETA prediction service is running".to_string(),
            model_name: self.model_name.clone(),
            latest_model_version: self.model_version.clone(),
            schema_fingerprint: self.pipeline.schema().fingerprint.clone(),
        }
    }

    pub fn predict(&self, record: &RawRecord) -> Result<PredictResponse, ServeError> {
        let row = match self.pipeline.clean_single(record) {
            CleanOutcome::Cleaned(row) => row,
            CleanOutcome::Rejected(rejection) => return Err(ServeError::Rejected(rejection)),
        };

        let prediction = self.predictor.predict(&row)?;
        let weights = self.predictor.weights();

        Ok(PredictResponse {
            predicted_time_minutes: prediction.minutes,
            model_version_used: self.model_version.clone(),
            weights: WeightsView {
                catboost: weights.catboost(),
                lightgbm: weights.lightgbm(),
            },
        })
    }
}

pub fn prediction_router(service: Arc<PredictionService>) -> Router {
    Router::new()
        .route("/", get(get_status))
        .route("/predict", post(post_predict))
        .with_state(ServeAppState { service })
}

#[derive(Clone)]
struct ServeAppState {
    service: Arc<PredictionService>,
}

async fn get_status(State(state): State<ServeAppState>) -> impl IntoResponse {
    info!(
        component = "eta_server",
        event = "http.status.request",
        model_version = state.service.model_version()
    );
    Json(state.service.status())
}

async fn post_predict(
    State(state): State<ServeAppState>,
    payload: Result<Json<RawRecord>, JsonRejection>,
) -> Result<Json<PredictResponse>, ServeError> {
    let Json(record) = payload.map_err(|rejection| {
        warn!(
            component = "eta_server",
            event = "http.predict.invalid_body",
            detail = %rejection.body_text()
        );
        ServeError::InvalidBody(rejection.body_text())
    })?;

    match state.service.predict(&record) {
        Ok(response) => {
            info!(
                component = "eta_server",
                event = "http.predict.request",
                outcome = "ok",
                predicted_time_minutes = response.predicted_time_minutes,
                model_version = %response.model_version_used
            );
            Ok(Json(response))
        }
        Err(ServeError::Rejected(rejection)) => {
            info!(
                component = "eta_server",
                event = "http.predict.request",
                outcome = "rejected",
                reason = rejection.code(),
                detail = %rejection
            );
            Err(ServeError::Rejected(rejection))
        }
        Err(err) => {
            error!(
                component = "eta_server",
                event = "http.predict.error",
                error = %err
            );
            Err(err)
        }
    }
}
