use delivery_eta::{
    init_logging, log_app_start, logging_config_from_env, read_feature_records, regression_metrics,
    search_blend_weights, service_config_from_env, split_config_from_env, FeatureRecord,
    ModelBundle, RegressionMetrics, Regressor,
};

struct Predictions {
    actual: Vec<f64>,
    catboost: Vec<f64>,
    lightgbm: Vec<f64>,
    blended: Vec<f64>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("evaluate_ensemble", &logging_cfg);

    let split_cfg = split_config_from_env()?;
    let bundle = ModelBundle::load_from_path(&service_config_from_env()?.bundle_path)?;

    let train = predict_all(&bundle, &read_feature_records(&split_cfg.train_path())?)?;
    let test = predict_all(&bundle, &read_feature_records(&split_cfg.test_path())?)?;

    let train_metrics = regression_metrics(&train.actual, &train.blended)?;
    let test_metrics = regression_metrics(&test.actual, &test.blended)?;

    println!(
        "Bundle {} v{} weights catboost={:.2} lightgbm={:.2}",
        bundle.model_name,
        bundle.version,
        bundle.weights.catboost(),
        bundle.weights.lightgbm()
    );
    print_metrics("TRAIN", &train_metrics);
    print_metrics("TEST", &test_metrics);
    print_metrics("GAP", &train_metrics.gap(&test_metrics));

    let search = search_blend_weights(&test.actual, &test.catboost, &test.lightgbm)?;
    for candidate in &search.candidates {
        println!(
            "w_cat = {:.2}, w_lgb = {:.2} -> MAE = {:.4}",
            candidate.catboost, candidate.lightgbm, candidate.mae
        );
    }
    println!(
        "Best w_cat = {:.3}, w_lgb = {:.3}, MAE = {:.4}",
        search.best.catboost(),
        search.best.lightgbm(),
        search.best_mae
    );

    Ok(())
}

fn predict_all(
    bundle: &ModelBundle,
    rows: &[FeatureRecord],
) -> Result<Predictions, Box<dyn std::error::Error>> {
    let mut out = Predictions {
        actual: Vec::with_capacity(rows.len()),
        catboost: Vec::with_capacity(rows.len()),
        lightgbm: Vec::with_capacity(rows.len()),
        blended: Vec::with_capacity(rows.len()),
    };

    for (idx, row) in rows.iter().enumerate() {
        let target = row
            .time_taken
            .ok_or_else(|| format!("row {idx} has no target value"))?;
        let features = bundle.preprocessor.transform(row)?;
        let catboost = bundle.catboost.predict(&features)?;
        let lightgbm = bundle.lightgbm.predict(&features)?;

        out.actual.push(f64::from(target));
        out.catboost.push(catboost);
        out.lightgbm.push(lightgbm);
        out.blended.push(bundle.weights.blend(catboost, lightgbm));
    }

    Ok(out)
}

fn print_metrics(label: &str, metrics: &RegressionMetrics) {
    println!(
        "{label:<5} MAE = {:.4}  RMSE = {:.4}  R2 = {:.4}",
        metrics.mae, metrics.rmse, metrics.r2
    );
}
