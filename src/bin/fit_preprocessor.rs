use std::fs;

use delivery_eta::{
    init_logging, log_app_start, logging_config_from_env, read_feature_records,
    split_config_from_env, write_matrix_csv, ColumnLayout, FeatureRecord, Preprocessor,
    TARGET_COLUMN,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("fit_preprocessor", &logging_cfg);

    let split_cfg = split_config_from_env()?;
    let train = read_feature_records(&split_cfg.train_path())?;
    let test = read_feature_records(&split_cfg.test_path())?;

    let preprocessor = Preprocessor::fit(&ColumnLayout::default(), &train)?;

    let mut header = preprocessor.feature_names();
    header.push(TARGET_COLUMN.to_string());

    let out_dir = split_cfg.processed_dir();
    let train_out = out_dir.join("train_trans.csv");
    let test_out = out_dir.join("test_trans.csv");
    write_matrix_csv(&train_out, &header, &with_target(&preprocessor, &train)?)?;
    write_matrix_csv(&test_out, &header, &with_target(&preprocessor, &test)?)?;

    let preprocessor_path = split_cfg.preprocessor_path();
    fs::create_dir_all(&split_cfg.models_dir)?;
    fs::write(&preprocessor_path, serde_json::to_vec_pretty(&preprocessor)?)?;

    println!(
        "Fitted preprocessor on {} rows ({} output columns) -> {}",
        train.len(),
        preprocessor.output_width(),
        preprocessor_path.display()
    );
    println!(
        "Transformed train={} -> {}, test={} -> {}",
        train.len(),
        train_out.display(),
        test.len(),
        test_out.display()
    );

    Ok(())
}

fn with_target(
    preprocessor: &Preprocessor,
    rows: &[FeatureRecord],
) -> Result<Vec<Vec<f64>>, Box<dyn std::error::Error>> {
    let mut out = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let target = row
            .time_taken
            .ok_or_else(|| format!("row {idx} has no {TARGET_COLUMN} value"))?;
        let mut features = preprocessor.transform(row)?;
        features.push(f64::from(target));
        out.push(features);
    }
    Ok(out)
}
