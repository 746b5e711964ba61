use std::env;
use std::fs;
use std::path::Path;

use delivery_eta::{
    init_logging, log_app_start, logging_config_from_env, pipeline_config_from_env,
    read_feature_records, search_blend_weights, split_config_from_env, BlendWeights,
    CleaningPipeline, ConfigError, ModelBundle, Preprocessor, Regressor, TreeEnsembleRegressor,
    DEFAULT_MODEL_NAME,
};
use serde::de::DeserializeOwned;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("build_bundle", &logging_cfg);

    let split_cfg = split_config_from_env()?;
    let pipeline = CleaningPipeline::new(pipeline_config_from_env()?)?;

    let preprocessor: Preprocessor = read_json(&split_cfg.preprocessor_path())?;
    preprocessor.validate()?;
    let catboost: TreeEnsembleRegressor = read_json(&split_cfg.exported_model_path("catboost"))?;
    let lightgbm: TreeEnsembleRegressor = read_json(&split_cfg.exported_model_path("lightgbm"))?;

    let weights = match env::var("ETA_BLEND_CATBOOST") {
        Ok(raw) => {
            let catboost = raw.trim().parse::<f64>().map_err(|_| ConfigError::InvalidEnv {
                key: "ETA_BLEND_CATBOOST",
                value: raw.clone(),
            })?;
            BlendWeights::from_catboost(catboost)?
        }
        Err(_) => {
            let test = read_feature_records(&split_cfg.test_path())?;
            let mut actual = Vec::with_capacity(test.len());
            let mut cat_pred = Vec::with_capacity(test.len());
            let mut lgb_pred = Vec::with_capacity(test.len());
            for (idx, row) in test.iter().enumerate() {
                let target = row
                    .time_taken
                    .ok_or_else(|| format!("test row {idx} has no target value"))?;
                let features = preprocessor.transform(row)?;
                actual.push(f64::from(target));
                cat_pred.push(catboost.predict(&features)?);
                lgb_pred.push(lightgbm.predict(&features)?);
            }
            let search = search_blend_weights(&actual, &cat_pred, &lgb_pred)?;
            println!(
                "Searched blend weights on {} test rows: best MAE = {:.4}",
                actual.len(),
                search.best_mae
            );
            search.best
        }
    };

    let version = env::var("ETA_MODEL_VERSION")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| "1".to_string());

    let bundle = ModelBundle::assemble(
        DEFAULT_MODEL_NAME,
        version,
        pipeline.schema(),
        preprocessor,
        catboost,
        lightgbm,
        weights,
    )?;
    let bundle_path = split_cfg.bundle_path();
    bundle.write_to_path(&bundle_path)?;

    println!(
        "Wrote {} v{} -> {} (schema v{} {}, catboost={:.2} lightgbm={:.2})",
        bundle.model_name,
        bundle.version,
        bundle_path.display(),
        bundle.schema_version,
        bundle.schema_fingerprint,
        bundle.weights.catboost(),
        bundle.weights.lightgbm()
    );

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let raw = fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("{}: {err}", path.display()).into())
}
