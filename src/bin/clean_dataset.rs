use std::path::PathBuf;

use delivery_eta::{
    init_logging, log_app_start, logging_config_from_env, pipeline_config_from_env,
    read_raw_records, split_config_from_env, split_train_test, write_feature_records,
    CleaningPipeline, CsvFileSink, FeatureSink,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start("clean_dataset", &logging_cfg);

    let split_cfg = split_config_from_env()?;
    let raw_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| split_cfg.raw_path());

    let pipeline = CleaningPipeline::new(pipeline_config_from_env()?)?;
    let raw = read_raw_records(&raw_path)?;

    let (rows, report) = pipeline.clean_batch(&raw)?;
    let mut sink = CsvFileSink::new(split_cfg.cleaned_path());
    sink.accept(pipeline.schema(), &rows, &report)?;

    println!(
        "Cleaned {} -> {}: input={} output={} underage={} invalid_rating={} malformed={} unresolved={}",
        raw_path.display(),
        sink.path().display(),
        report.input_rows,
        report.output_rows,
        report.excluded_underage,
        report.excluded_invalid_rating,
        report.malformed_rows,
        report.unresolved_rows
    );
    if let Some(first_error) = &report.first_error {
        println!("First malformed row: {first_error}");
    }

    let split = split_train_test(&rows, &split_cfg)?;
    write_feature_records(&split_cfg.train_path(), &split.train)?;
    write_feature_records(&split_cfg.test_path(), &split.test)?;

    println!(
        "Split seed={} test_size={}: train={} -> {}, test={} -> {}",
        split_cfg.seed,
        split_cfg.test_size,
        split.train.len(),
        split_cfg.train_path().display(),
        split.test.len(),
        split_cfg.test_path().display()
    );

    Ok(())
}
