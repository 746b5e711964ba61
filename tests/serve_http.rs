use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use delivery_eta::{
    prediction_router, BlendWeights, BundleError, CleanOutcome, CleaningPipeline, ColumnLayout,
    EnsemblePredictor, FeatureRecord, ModelBundle, PipelineConfig, PredictError,
    PredictionService, Preprocessor, RawRecord, Regressor, SchemaError, TreeEnsembleRegressor,
    DEFAULT_MODEL_NAME, FEATURE_SCHEMA_VERSION,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

fn payload() -> Value {
    json!({
        "ID": "0x4607",
        "Delivery_person_ID": "INDORES13DEL02",
        "Delivery_person_Age": 37.0,
        "Delivery_person_Ratings": 4.9,
        "Restaurant_latitude": 22.745049,
        "Restaurant_longitude": 75.892471,
        "Delivery_location_latitude": 22.765049,
        "Delivery_location_longitude": 75.912471,
        "Order_Date": "19-03-2022",
        "Time_Orderd": "11:30:00",
        "Time_Order_picked": "11:45:00",
        "Weatherconditions": "conditions Sunny",
        "Road_traffic_density": "High ",
        "Vehicle_condition": 2,
        "Type_of_order": "Snack ",
        "Type_of_vehicle": "motorcycle ",
        "multiple_deliveries": 0.0,
        "Festival": "No ",
        "City": "Urban "
    })
}

fn training_rows(pipeline: &CleaningPipeline) -> Vec<FeatureRecord> {
    let variants = [
        ("conditions Sunny", "High ", "37"),
        ("conditions Fog", "Jam ", "24"),
        ("conditions Stormy", "Low ", "29"),
    ];
    variants
        .iter()
        .map(|(weather, traffic, age)| {
            let mut raw: RawRecord =
                serde_json::from_value(payload()).expect("payload is a raw record");
            raw.insert("Weatherconditions", *weather);
            raw.insert("Road_traffic_density", *traffic);
            raw.insert("Delivery_person_Age", *age);
            match pipeline.clean_single(&raw) {
                CleanOutcome::Cleaned(row) => row,
                other => panic!("training row should clean, got {other:?}"),
            }
        })
        .collect()
}

fn constant_model(n_features: usize, value: f64) -> TreeEnsembleRegressor {
    TreeEnsembleRegressor {
        n_features,
        base_score: value,
        trees: Vec::new(),
    }
}

fn bundle() -> ModelBundle {
    let pipeline = CleaningPipeline::new(PipelineConfig::default()).expect("valid config");
    let preprocessor = Preprocessor::fit(&ColumnLayout::default(), &training_rows(&pipeline))
        .expect("preprocessor fits");
    let width = preprocessor.output_width();

    ModelBundle::assemble(
        DEFAULT_MODEL_NAME,
        "7",
        pipeline.schema(),
        preprocessor,
        constant_model(width, 30.0),
        constant_model(width, 20.0),
        BlendWeights::new(0.6, 0.4).expect("valid weights"),
    )
    .expect("bundle assembles")
}

fn app() -> Router {
    let pipeline = CleaningPipeline::new(PipelineConfig::default()).expect("valid config");
    let service = PredictionService::from_bundle(pipeline, &bundle()).expect("bundle matches");
    prediction_router(Arc::new(service))
}

async fn post_json(app: Router, body: String) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/predict")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn status_route_reports_model_version() {
    let response = app()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["latest_model_version"], "7");
    assert_eq!(json["model_name"], "delivery-eta-ensemble");
    assert!(json["schema_fingerprint"].as_str().is_some_and(|f| f.len() == 64));
}

#[tokio::test]
async fn predict_returns_blended_minutes_and_weights() {
    let (status, json) = post_json(app(), payload().to_string()).await;

    assert_eq!(status, StatusCode::OK);
    let minutes = json["predicted_time_minutes"].as_f64().unwrap();
    assert!((minutes - 26.0).abs() < 1e-9, "{minutes}");
    assert_eq!(json["model_version_used"], "7");
    assert_eq!(json["weights"]["catboost"], 0.6);
    assert_eq!(json["weights"]["lightgbm"], 0.4);
}

#[tokio::test]
async fn string_encoded_numbers_are_accepted() {
    let mut body = payload();
    body["Delivery_person_Age"] = json!("37");
    body["Vehicle_condition"] = json!("2");

    let (status, _) = post_json(app(), body.to_string()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn underage_rider_is_rejected_with_reason() {
    let mut body = payload();
    body["Delivery_person_Age"] = json!(16.0);

    let (status, json) = post_json(app(), body.to_string()).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "invalid_input");
    assert_eq!(json["reason"], "underage_rider");
    assert!(json["detail"].as_str().unwrap().contains("16"));
}

#[tokio::test]
async fn unresolved_and_malformed_fields_are_rejected() {
    let mut midnight = payload();
    midnight["Time_Orderd"] = json!("00:15:00");
    let (status, json) = post_json(app(), midnight.to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["reason"], "unresolved_field");

    let mut bad_date = payload();
    bad_date["Order_Date"] = json!("yesterday");
    let (status, json) = post_json(app(), bad_date.to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["reason"], "malformed_field");
}

#[tokio::test]
async fn non_object_body_is_rejected_as_invalid_input() {
    let (status, json) = post_json(app(), "[1, 2, 3]".to_string()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["reason"], "malformed_body");
}

struct FailingRegressor;

impl Regressor for FailingRegressor {
    fn predict(&self, _features: &[f64]) -> Result<f64, PredictError> {
        Err(PredictError::NonFinite)
    }
}

#[tokio::test]
async fn model_failure_is_a_server_error() {
    let bundle = bundle();
    let predictor = EnsemblePredictor::new(
        bundle.preprocessor.clone(),
        Arc::new(FailingRegressor),
        Arc::new(bundle.lightgbm.clone()),
        bundle.weights,
    );
    let pipeline = CleaningPipeline::new(PipelineConfig::default()).expect("valid config");
    let service = PredictionService::new(pipeline, predictor, "broken", "0");

    let (status, json) = post_json(prediction_router(Arc::new(service)), payload().to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "prediction_failed");
}

#[test]
fn bundle_round_trips_through_disk_and_guards_schema() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("model_bundle.json");
    let original = bundle();
    original.write_to_path(&path).expect("bundle writes");

    let loaded = ModelBundle::load_from_path(&path).expect("bundle loads");
    assert_eq!(loaded.version, original.version);
    assert_eq!(loaded.weights, original.weights);
    assert_eq!(
        loaded.preprocessor.feature_names(),
        original.preprocessor.feature_names()
    );

    let mut cfg = PipelineConfig::default();
    cfg.min_rider_age = 21.0;
    let drifted = CleaningPipeline::new(cfg).expect("valid config");
    assert!(matches!(
        PredictionService::from_bundle(drifted, &loaded),
        Err(BundleError::Schema(SchemaError::SchemaFingerprintMismatch { .. }))
    ));
}

#[test]
fn bundle_with_inconsistent_weights_fails_to_load() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("model_bundle.json");
    let mut json = serde_json::to_value(bundle()).unwrap();
    json["weights"] = json!({ "catboost": 0.6, "lightgbm": 0.6 });
    std::fs::write(&path, json.to_string()).unwrap();

    assert!(matches!(
        ModelBundle::load_from_path(&path),
        Err(BundleError::Parse { .. })
    ));

    let mut json = serde_json::to_value(bundle()).unwrap();
    json["lightgbm"]["n_features"] = json!(3);
    std::fs::write(&path, json.to_string()).unwrap();
    assert!(matches!(
        ModelBundle::load_from_path(&path),
        Err(BundleError::InvalidModel { model: "lightgbm", .. })
    ));
}

#[test]
fn assembled_bundle_carries_the_live_schema_stamp() {
    let pipeline = CleaningPipeline::new(PipelineConfig::default()).expect("valid config");
    let assembled = bundle();

    assert_eq!(assembled.schema_version, FEATURE_SCHEMA_VERSION);
    assert_eq!(assembled.schema_fingerprint, pipeline.schema().fingerprint);
    assembled
        .check_schema(pipeline.schema())
        .expect("assembled bundle matches the pipeline it was built with");

    let dir = tempfile::tempdir().expect("tempdir should be created");
    let path = dir.path().join("models").join("model_bundle.json");
    assembled.write_to_path(&path).expect("bundle writes");
    let loaded = ModelBundle::load_from_path(&path).expect("bundle loads");
    assert!(PredictionService::from_bundle(pipeline, &loaded).is_ok());
}

#[test]
fn assembly_rejects_models_sized_for_another_preprocessor() {
    let pipeline = CleaningPipeline::new(PipelineConfig::default()).expect("valid config");
    let good = bundle();
    let width = good.preprocessor.output_width();

    let result = ModelBundle::assemble(
        DEFAULT_MODEL_NAME,
        "8",
        pipeline.schema(),
        good.preprocessor,
        constant_model(width, 30.0),
        constant_model(width + 1, 20.0),
        good.weights,
    );
    assert!(matches!(
        result,
        Err(BundleError::InvalidModel { model: "lightgbm", .. })
    ));
}
