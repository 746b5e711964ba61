use delivery_eta::{
    build_feature_schema, CleanOutcome, CleaningError, CleaningPipeline, DistanceType, Exclusion,
    FeatureColumn, FeatureSink, InMemorySink, PipelineConfig, RawRecord, RawValue, Rejection,
    TimeOfDay, PRUNED_COLUMNS,
};

fn pipeline() -> CleaningPipeline {
    CleaningPipeline::new(PipelineConfig::default()).expect("default config should be valid")
}

fn order(overrides: &[(&str, &str)]) -> RawRecord {
    let mut record = RawRecord::from_pairs([
        ("ID", "0x4607"),
        ("Delivery_person_ID", "INDORES13DEL02"),
        ("Delivery_person_Age", "37"),
        ("Delivery_person_Ratings", "4.9"),
        ("Restaurant_latitude", "22.745049"),
        ("Restaurant_longitude", "75.892471"),
        ("Delivery_location_latitude", "22.765049"),
        ("Delivery_location_longitude", "75.912471"),
        ("Order_Date", "19-03-2022"),
        ("Time_Orderd", "11:30:00"),
        ("Time_Order_picked", "11:45:00"),
        ("Weatherconditions", "conditions Sunny"),
        ("Road_traffic_density", "High "),
        ("Vehicle_condition", "2"),
        ("Type_of_order", "Snack "),
        ("Type_of_vehicle", "motorcycle "),
        ("multiple_deliveries", "0"),
        ("Festival", "No "),
        ("City", "Urban "),
        ("Time_taken(min)", "(min) 24"),
    ]);
    for (key, value) in overrides {
        record.insert(*key, *value);
    }
    record
}

fn without_target(mut record: RawRecord) -> RawRecord {
    record.remove("Time_taken(min)");
    record
}

#[test]
fn single_valid_row_yields_one_complete_record() {
    let row = match pipeline().clean_single(&order(&[])) {
        CleanOutcome::Cleaned(row) => row,
        other => panic!("expected a cleaned row, got {other:?}"),
    };

    assert_eq!(row.age, 37.0);
    assert_eq!(row.ratings, 4.9);
    assert_eq!(row.weather, "sunny");
    assert_eq!(row.traffic, "high");
    assert_eq!(row.vehicle_condition, 2);
    assert_eq!(row.type_of_order, "snack");
    assert_eq!(row.type_of_vehicle, "motorcycle");
    assert_eq!(row.festival, "no");
    assert_eq!(row.city_type, "urban");
    assert_eq!(row.time_taken, Some(24));
    assert_eq!(row.is_weekend, 1);
    assert_eq!(row.pickup_time_minutes, 15.0);
    assert_eq!(row.order_time_of_day, TimeOfDay::Morning);
    assert_eq!(row.distance_type, DistanceType::Short);
    assert!((row.distance - 3.02).abs() < 0.05, "distance {}", row.distance);
}

#[test]
fn single_record_with_null_or_sentinel_target_still_cleans() {
    let p = pipeline();

    let mut null_target = order(&[]);
    null_target.insert("Time_taken(min)", RawValue::Missing);
    assert!(matches!(
        p.clean_single(&null_target),
        CleanOutcome::Cleaned(ref row) if row.time_taken.is_none()
    ));

    assert!(matches!(
        p.clean_single(&order(&[("Time_taken(min)", "NaN ")])),
        CleanOutcome::Cleaned(ref row) if row.time_taken.is_none()
    ));
}

#[test]
fn serving_rows_carry_no_target() {
    let outcome = pipeline().clean_single(&without_target(order(&[])));
    assert!(matches!(outcome, CleanOutcome::Cleaned(ref row) if row.time_taken.is_none()));
}

#[test]
fn single_underage_row_is_an_explicit_rejection() {
    let outcome = pipeline().clean_single(&order(&[("Delivery_person_Age", "15")]));
    assert_eq!(
        outcome,
        CleanOutcome::Rejected(Rejection::Excluded {
            exclusion: Exclusion::Underage { age: 15.0 }
        })
    );
}

#[test]
fn filter_boundaries_hold_through_the_pipeline() {
    let p = pipeline();
    assert!(matches!(
        p.clean_single(&order(&[("Delivery_person_Age", "18")])),
        CleanOutcome::Cleaned(_)
    ));
    assert!(matches!(
        p.clean_single(&order(&[("Delivery_person_Age", "17.999")])),
        CleanOutcome::Rejected(Rejection::Excluded { .. })
    ));
    assert!(matches!(
        p.clean_single(&order(&[("Delivery_person_Ratings", "6")])),
        CleanOutcome::Rejected(Rejection::Excluded {
            exclusion: Exclusion::InvalidRating { .. }
        })
    ));
    assert!(matches!(
        p.clean_single(&order(&[("Delivery_person_Ratings", "6.0")])),
        CleanOutcome::Cleaned(_)
    ));
    assert!(matches!(
        p.clean_single(&order(&[("Delivery_person_Ratings", "5.9")])),
        CleanOutcome::Cleaned(_)
    ));
}

#[test]
fn trailing_space_nan_never_survives_as_a_category() {
    let p = pipeline();
    let outcome = p.clean_single(&order(&[("Festival", "NaN ")]));
    assert_eq!(
        outcome,
        CleanOutcome::Rejected(Rejection::Unresolved {
            column: FeatureColumn::Festival
        })
    );

    let outcome = p.clean_single(&order(&[("Weatherconditions", "conditions NaN")]));
    assert_eq!(
        outcome,
        CleanOutcome::Rejected(Rejection::Unresolved {
            column: FeatureColumn::Weather
        })
    );

    let outcome = p.clean_single(&order(&[("Delivery_person_Age", "NaN ")]));
    assert_eq!(
        outcome,
        CleanOutcome::Rejected(Rejection::Unresolved {
            column: FeatureColumn::Age
        })
    );
}

#[test]
fn midnight_orders_and_far_deliveries_are_dropped() {
    let p = pipeline();
    let midnight = order(&[("Time_Orderd", "00:20:00"), ("Time_Order_picked", "00:30:00")]);
    assert_eq!(
        p.clean_single(&midnight),
        CleanOutcome::Rejected(Rejection::Unresolved {
            column: FeatureColumn::OrderTimeOfDay
        })
    );
    assert_eq!(
        p.clean_single(&order(&[("Delivery_location_latitude", "23.045049")])),
        CleanOutcome::Rejected(Rejection::Unresolved {
            column: FeatureColumn::DistanceType
        })
    );
}

#[test]
fn pickup_wraps_midnight_and_signs_are_discarded() {
    let row = match pipeline().clean_single(&order(&[
        ("Time_Orderd", "23:55:00"),
        ("Time_Order_picked", "00:05:00"),
        ("Restaurant_latitude", "-22.745049"),
    ])) {
        CleanOutcome::Cleaned(row) => row,
        other => panic!("expected a cleaned row, got {other:?}"),
    };
    assert_eq!(row.pickup_time_minutes, 10.0);
    assert_eq!(row.order_time_of_day, TimeOfDay::Night);
    assert!(row.distance < 5.0);
}

#[test]
fn malformed_fields_reject_the_row_only() {
    let p = pipeline();
    let field = match p.clean_single(&order(&[("Order_Date", "2022/19/03")])) {
        CleanOutcome::Rejected(Rejection::Malformed { field }) => field,
        other => panic!("expected a malformed rejection, got {other:?}"),
    };
    assert_eq!(field.field, "order_date");

    let batch = vec![
        order(&[]),
        order(&[("Delivery_person_Age", "abc")]),
        order(&[("Time_taken(min)", "(min) soon")]),
    ];
    let (rows, report) = p.clean_batch(&batch).expect("one row survives");
    assert_eq!(rows.len(), 1);
    assert_eq!(report.malformed_rows, 2);
    assert!(report
        .first_error
        .as_deref()
        .is_some_and(|msg| msg.contains("age")));
}

#[test]
fn batch_report_counts_every_drop_reason() {
    let batch = vec![
        order(&[]),
        order(&[("Delivery_person_Age", "16")]),
        order(&[("Delivery_person_Ratings", "6")]),
        order(&[("Weatherconditions", "conditions NaN")]),
        order(&[("Vehicle_condition", "two")]),
        order(&[("Time_Orderd", "21:10"), ("Time_Order_picked", "21:25")]),
    ];

    let (rows, report) = pipeline().clean_batch(&batch).expect("batch should clean");

    assert_eq!(rows.len(), 2);
    assert_eq!(report.input_rows, 6);
    assert_eq!(report.output_rows, 2);
    assert_eq!(report.excluded_underage, 1);
    assert_eq!(report.excluded_invalid_rating, 1);
    assert_eq!(report.unresolved_rows, 1);
    assert_eq!(report.malformed_rows, 1);
    assert_eq!(report.dropped_rows(), 4);
    assert!(report.has_target);
}

#[test]
fn cleaning_is_idempotent_and_batch_matches_singles() {
    let p = pipeline();
    let batch = vec![
        order(&[]),
        order(&[("Delivery_person_Age", "16")]),
        order(&[
            ("Time_Orderd", "18:00"),
            ("Time_Order_picked", "18:10"),
            ("Order_Date", "21-03-2022"),
        ]),
        order(&[("Road_traffic_density", "Jam "), ("Festival", "Yes ")]),
    ];

    let first = p.clean_batch(&batch).expect("first run");
    let second = p.clean_batch(&batch).expect("second run");
    assert_eq!(first, second);

    let singles: Vec<_> = batch
        .iter()
        .filter_map(|record| match p.clean_single(record) {
            CleanOutcome::Cleaned(row) => Some(row),
            CleanOutcome::Rejected(_) => None,
        })
        .collect();
    assert_eq!(first.0, singles);
}

#[test]
fn pruned_columns_never_reach_the_output() {
    let p = pipeline();
    let (rows, _) = p.clean_batch(&[order(&[])]).expect("batch should clean");
    let json = serde_json::to_value(&rows[0]).expect("row serializes");
    let object = json.as_object().expect("row is an object");

    for pruned in PRUNED_COLUMNS {
        assert!(!object.contains_key(pruned), "{pruned} leaked");
    }
    assert!(!object.contains_key("id"));
    assert_eq!(object.len(), FeatureColumn::ALL.len());
    assert_eq!(p.schema(), &build_feature_schema(&PipelineConfig::default()));
}

#[test]
fn empty_inputs_and_all_dropped_batches_are_distinct_errors() {
    let p = pipeline();
    assert!(matches!(p.clean_batch(&[]), Err(CleaningError::NoInput)));

    let report = match p.clean_batch(&[order(&[("Delivery_person_Age", "12")])]) {
        Err(CleaningError::EmptyResult { report }) => report,
        other => panic!("expected EmptyResult, got {other:?}"),
    };
    assert_eq!(report.input_rows, 1);
    assert_eq!(report.excluded_underage, 1);
}

#[test]
fn batch_output_can_be_handed_to_a_sink() {
    let p = pipeline();
    let mut sink = InMemorySink::default();
    let report = p
        .clean_batch_into(&[order(&[]), without_target(order(&[]))], &mut sink)
        .expect("batch should clean");

    // the batch carries a target column, so the row without one is dropped
    assert_eq!(report.output_rows, 1);
    assert_eq!(sink.rows.len(), 1);
    assert_eq!(sink.report, Some(report));

    let mut second = InMemorySink::default();
    second
        .accept(p.schema(), &sink.rows, &Default::default())
        .expect("in-memory sink accepts");
    assert_eq!(second.rows, sink.rows);
}

#[test]
fn json_numbers_are_accepted_like_csv_text() {
    let mut record = order(&[]);
    record.insert("Delivery_person_Age", RawValue::Number(37.0));
    record.insert("Vehicle_condition", RawValue::Number(2.0));
    record.insert("multiple_deliveries", RawValue::Missing);

    assert_eq!(
        pipeline().clean_single(&record),
        CleanOutcome::Rejected(Rejection::Unresolved {
            column: FeatureColumn::MultipleDeliveries
        })
    );

    record.insert("multiple_deliveries", RawValue::Number(1.0));
    assert!(matches!(pipeline().clean_single(&record), CleanOutcome::Cleaned(_)));
}

#[test]
fn invalid_configuration_is_fatal_at_construction() {
    let mut cfg = PipelineConfig::default();
    cfg.distance_bins.edges = vec![0.0, 10.0, 5.0, 15.0, 25.0];
    assert!(CleaningPipeline::new(cfg).is_err());
}
