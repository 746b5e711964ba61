//! Feature record layout and the schema fingerprint shared by training and serving.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::canonical::{CanonicalRecord, Target};
use crate::config::{BinLabel, PipelineConfig};
use crate::geo::{DistanceType, GeoFeatures};
use crate::temporal::{TemporalFeatures, TimeOfDay};

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const TARGET_COLUMN: &str = "time_taken";

/// Intermediate or raw columns that never reach the feature table.
pub const PRUNED_COLUMNS: [&str; 11] = [
    "rider_id",
    "restaurant_latitude",
    "restaurant_longitude",
    "delivery_latitude",
    "delivery_longitude",
    "order_date",
    "order_time_hour",
    "order_day",
    "city_name",
    "order_day_of_week",
    "order_month",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureColumn {
    Age,
    Ratings,
    Weather,
    Traffic,
    VehicleCondition,
    TypeOfOrder,
    TypeOfVehicle,
    MultipleDeliveries,
    Festival,
    CityType,
    TimeTaken,
    IsWeekend,
    PickupTimeMinutes,
    OrderTimeOfDay,
    Distance,
    DistanceType,
}

impl FeatureColumn {
    /// Output order of the feature table.
    pub const ALL: [FeatureColumn; 16] = [
        Self::Age,
        Self::Ratings,
        Self::Weather,
        Self::Traffic,
        Self::VehicleCondition,
        Self::TypeOfOrder,
        Self::TypeOfVehicle,
        Self::MultipleDeliveries,
        Self::Festival,
        Self::CityType,
        Self::TimeTaken,
        Self::IsWeekend,
        Self::PickupTimeMinutes,
        Self::OrderTimeOfDay,
        Self::Distance,
        Self::DistanceType,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Ratings => "ratings",
            Self::Weather => "weather",
            Self::Traffic => "traffic",
            Self::VehicleCondition => "vehicle_condition",
            Self::TypeOfOrder => "type_of_order",
            Self::TypeOfVehicle => "type_of_vehicle",
            Self::MultipleDeliveries => "multiple_deliveries",
            Self::Festival => "festival",
            Self::CityType => "city_type",
            Self::TimeTaken => TARGET_COLUMN,
            Self::IsWeekend => "is_weekend",
            Self::PickupTimeMinutes => "pickup_time_minutes",
            Self::OrderTimeOfDay => "order_time_of_day",
            Self::Distance => "distance",
            Self::DistanceType => "distance_type",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|column| column.as_str() == name)
    }
}

/// A column value as seen by downstream encoders.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue<'a> {
    Number(f64),
    Category(Cow<'a, str>),
    Absent,
}

/// One cleaned, feature-complete delivery row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub age: f64,
    pub ratings: f64,
    pub weather: String,
    pub traffic: String,
    pub vehicle_condition: i64,
    pub type_of_order: String,
    pub type_of_vehicle: String,
    pub multiple_deliveries: f64,
    pub festival: String,
    pub city_type: String,
    pub time_taken: Option<u32>,
    pub is_weekend: u8,
    pub pickup_time_minutes: f64,
    pub order_time_of_day: TimeOfDay,
    pub distance: f64,
    pub distance_type: DistanceType,
}

impl FeatureRecord {
    /// Projects the derived state onto the feature columns.
    ///
    /// Fails with the first column left without a concrete value. The target
    /// is only required when `require_target` is set; otherwise a parsed value
    /// is kept and a missing one becomes `None`.
    pub fn assemble(
        canonical: CanonicalRecord,
        temporal: TemporalFeatures,
        geo: GeoFeatures,
        require_target: bool,
    ) -> Result<Self, FeatureColumn> {
        let time_taken = match (require_target, canonical.time_taken) {
            (_, Target::Minutes(minutes)) => Some(minutes),
            (false, Target::Missing | Target::NotProvided) => None,
            (true, Target::Missing | Target::NotProvided) => {
                return Err(FeatureColumn::TimeTaken)
            }
        };

        Ok(Self {
            age: need(canonical.age, FeatureColumn::Age)?,
            ratings: need(canonical.ratings, FeatureColumn::Ratings)?,
            weather: need(canonical.weather, FeatureColumn::Weather)?,
            traffic: need(canonical.traffic, FeatureColumn::Traffic)?,
            vehicle_condition: need(canonical.vehicle_condition, FeatureColumn::VehicleCondition)?,
            type_of_order: need(canonical.type_of_order, FeatureColumn::TypeOfOrder)?,
            type_of_vehicle: need(canonical.type_of_vehicle, FeatureColumn::TypeOfVehicle)?,
            multiple_deliveries: need(
                canonical.multiple_deliveries,
                FeatureColumn::MultipleDeliveries,
            )?,
            festival: need(canonical.festival, FeatureColumn::Festival)?,
            city_type: need(canonical.city_type, FeatureColumn::CityType)?,
            time_taken,
            is_weekend: need(temporal.is_weekend, FeatureColumn::IsWeekend)?,
            pickup_time_minutes: need(
                temporal.pickup_time_minutes,
                FeatureColumn::PickupTimeMinutes,
            )?,
            order_time_of_day: need(temporal.order_time_of_day, FeatureColumn::OrderTimeOfDay)?,
            distance: need(geo.distance, FeatureColumn::Distance)?,
            distance_type: need(geo.distance_type, FeatureColumn::DistanceType)?,
        })
    }

    pub fn value(&self, column: FeatureColumn) -> FeatureValue<'_> {
        match column {
            FeatureColumn::Age => FeatureValue::Number(self.age),
            FeatureColumn::Ratings => FeatureValue::Number(self.ratings),
            FeatureColumn::Weather => category(&self.weather),
            FeatureColumn::Traffic => category(&self.traffic),
            FeatureColumn::VehicleCondition => FeatureValue::Number(self.vehicle_condition as f64),
            FeatureColumn::TypeOfOrder => category(&self.type_of_order),
            FeatureColumn::TypeOfVehicle => category(&self.type_of_vehicle),
            FeatureColumn::MultipleDeliveries => FeatureValue::Number(self.multiple_deliveries),
            FeatureColumn::Festival => category(&self.festival),
            FeatureColumn::CityType => category(&self.city_type),
            FeatureColumn::TimeTaken => match self.time_taken {
                Some(minutes) => FeatureValue::Number(f64::from(minutes)),
                None => FeatureValue::Absent,
            },
            FeatureColumn::IsWeekend => FeatureValue::Category(Cow::Owned(self.is_weekend.to_string())),
            FeatureColumn::PickupTimeMinutes => FeatureValue::Number(self.pickup_time_minutes),
            FeatureColumn::OrderTimeOfDay => {
                FeatureValue::Category(Cow::Borrowed(self.order_time_of_day.as_str()))
            }
            FeatureColumn::Distance => FeatureValue::Number(self.distance),
            FeatureColumn::DistanceType => {
                FeatureValue::Category(Cow::Borrowed(self.distance_type.as_str()))
            }
        }
    }
}

fn need<T>(value: Option<T>, column: FeatureColumn) -> Result<T, FeatureColumn> {
    value.ok_or(column)
}

fn category(value: &str) -> FeatureValue<'_> {
    FeatureValue::Category(Cow::Borrowed(value))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    /// Model input columns, target excluded.
    pub columns: Vec<String>,
    pub target: String,
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

pub fn build_feature_schema(cfg: &PipelineConfig) -> FeatureSchema {
    let columns: Vec<String> = FeatureColumn::ALL
        .into_iter()
        .filter(|column| *column != FeatureColumn::TimeTaken)
        .map(|column| column.as_str().to_string())
        .collect();

    let fingerprint = schema_fingerprint(cfg, &columns);

    info!(
        component = "features",
        event = "features.schema.built",
        version = FEATURE_SCHEMA_VERSION,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: FEATURE_SCHEMA_VERSION,
        fingerprint,
        columns,
        target: TARGET_COLUMN.to_string(),
    }
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), SchemaError> {
    if expected_version != actual.version {
        return Err(SchemaError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(SchemaError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn schema_fingerprint(cfg: &PipelineConfig, columns: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{FEATURE_SCHEMA_VERSION};"));
    hasher.update("renames:");
    for rule in &cfg.rename_table {
        hasher.update(format!("{}>{},", rule.from, rule.to));
    }
    hasher.update(";missing_tokens:");
    for token in &cfg.missing_tokens {
        hasher.update(format!("{token:?},"));
    }
    hasher.update(format!(
        ";min_rider_age:{};invalid_rating:{:?};city_delimiter:{:?};weather_prefix:{:?};weather_missing:{:?};target_prefix:{:?};",
        cfg.min_rider_age,
        cfg.invalid_rating_literal,
        cfg.rider_city_delimiter,
        cfg.weather_prefix,
        cfg.weather_missing_literal,
        cfg.target_prefix
    ));
    hasher.update(format!(
        "time_of_day_bins:{};",
        cfg.time_of_day_bins.fingerprint_text()
    ));
    hasher.update(format!("distance_bins:{};", cfg.distance_bins.fingerprint_text()));
    hasher.update(format!("earth_radius_km:{};", cfg.earth_radius_km));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.as_bytes());
        hasher.update(";");
    }
    hasher.update(format!("target:{TARGET_COLUMN};"));
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_deterministic_and_excludes_pruned_columns() {
        let cfg = PipelineConfig::default();
        let a = build_feature_schema(&cfg);
        let b = build_feature_schema(&cfg);

        assert_eq!(a, b);
        assert_eq!(a.version, FEATURE_SCHEMA_VERSION);
        assert_eq!(a.columns.len(), 15);
        assert_eq!(a.columns[0], "age");
        assert_eq!(a.columns[14], "distance_type");
        assert!(!a.columns.iter().any(|c| c == TARGET_COLUMN));
        for pruned in PRUNED_COLUMNS {
            assert!(!a.columns.iter().any(|c| c == pruned), "{pruned} leaked");
        }
    }

    #[test]
    fn fingerprint_tracks_bucket_edges() {
        let base = build_feature_schema(&PipelineConfig::default());
        let mut cfg = PipelineConfig::default();
        cfg.distance_bins.edges = vec![0.0, 4.0, 10.0, 15.0, 25.0];
        let changed = build_feature_schema(&cfg);
        assert_ne!(base.fingerprint, changed.fingerprint);
    }

    #[test]
    fn compatibility_check_reports_version_then_fingerprint() {
        let schema = build_feature_schema(&PipelineConfig::default());

        assert!(assert_schema_compatible(FEATURE_SCHEMA_VERSION, &schema.fingerprint, &schema).is_ok());
        assert!(matches!(
            assert_schema_compatible(FEATURE_SCHEMA_VERSION + 1, &schema.fingerprint, &schema),
            Err(SchemaError::SchemaVersionMismatch { .. })
        ));
        assert!(matches!(
            assert_schema_compatible(FEATURE_SCHEMA_VERSION, "deadbeef", &schema),
            Err(SchemaError::SchemaFingerprintMismatch { .. })
        ));
    }

    #[test]
    fn column_names_round_trip() {
        for column in FeatureColumn::ALL {
            assert_eq!(FeatureColumn::parse(column.as_str()), Some(column));
        }
        assert_eq!(FeatureColumn::parse("rider_id"), None);
    }
}
