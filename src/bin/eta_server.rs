use std::sync::Arc;

use delivery_eta::{
    init_logging, log_app_bind, log_app_start, log_bundle_loaded, logging_config_from_env,
    pipeline_config_from_env, prediction_router, service_config_from_env, CleaningPipeline,
    ModelBundle, PredictionService,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("eta_server", &logging_cfg);

    let service_cfg = service_config_from_env()?;
    let pipeline = CleaningPipeline::new(pipeline_config_from_env()?)?;

    let bundle = ModelBundle::load_from_path(&service_cfg.bundle_path)?;
    log_bundle_loaded(
        &service_cfg.bundle_path,
        &bundle.model_name,
        &bundle.version,
        &bundle.schema_fingerprint,
    );
    let service = PredictionService::from_bundle(pipeline, &bundle)?;

    let app = prediction_router(Arc::new(service));
    let listener = tokio::net::TcpListener::bind(service_cfg.bind_addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
