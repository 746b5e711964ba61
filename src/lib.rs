//! Delivery ETA core crate.
//!
//! Current implemented scope:
//! - deterministic cleaning and feature pipeline shared by training and serving
//! - dataset IO, seeded train/test split and the column preprocessor
//! - blended tree-ensemble prediction, evaluation metrics and weight search
//! - HTTP prediction service

mod canonical;
mod config;
mod dataset;
mod ensemble;
mod features;
mod filter;
mod geo;
mod observability;
mod pipeline;
mod preprocess;
mod schema;
mod serve;
mod sink;
mod temporal;

pub use canonical::{CanonicalRecord, Canonicalizer, MalformedField, Target, CANONICAL_FIELDS};
pub use config::{
    pipeline_config_from_env, BinClosed, BinLabel, Bins, ConfigError, PipelineConfig, RenameRule,
    DEFAULT_MISSING_TOKENS, DEFAULT_RENAME_TABLE, EARTH_RADIUS_KM,
};
pub use dataset::{
    read_feature_records, read_raw_records, split_config_from_env, split_train_test,
    write_feature_records, write_matrix_csv, DatasetError, SplitConfig, TrainTestSplit,
    DEFAULT_SPLIT_SEED, DEFAULT_TEST_SIZE,
};
pub use ensemble::{
    mean_absolute_error, regression_metrics, search_blend_weights, BlendCandidate,
    BlendSearchResult, BlendWeights, BundleError, EnsemblePredictor, ModelBundle, PredictError,
    Prediction, RegressionMetrics, RegressionTree, Regressor, TreeEnsembleRegressor, TreeNode,
    DEFAULT_MODEL_NAME,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, FeatureColumn, FeatureRecord, FeatureSchema,
    FeatureValue, SchemaError, FEATURE_SCHEMA_VERSION, PRUNED_COLUMNS, TARGET_COLUMN,
};
pub use filter::{Exclusion, RowFilter};
pub use geo::{derive_geo, haversine_km, DistanceType, GeoFeatures};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_bundle_loaded, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{CleanOutcome, CleaningError, CleaningPipeline, CleaningReport, Rejection};
pub use preprocess::{
    ColumnLayout, MinMaxColumn, OneHotColumn, OrdinalColumn, PreprocessError, Preprocessor,
    DISTANCE_TYPE_ORDER, TRAFFIC_ORDER,
};
pub use schema::{RawRecord, RawValue, SchemaNormalizer};
pub use serve::{
    prediction_router, service_config_from_env, ErrorBody, PredictResponse, PredictionService,
    ServeError, ServiceConfig, StatusResponse, WeightsView, DEFAULT_MODEL_BUNDLE,
    DEFAULT_SERVE_ADDR,
};
pub use sink::{CsvFileSink, FeatureSink, InMemorySink, SinkError};
pub use temporal::{derive_temporal, pickup_minutes, TemporalFeatures, TimeOfDay};
