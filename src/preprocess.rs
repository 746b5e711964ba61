//! Column preprocessor fitted on training rows and replayed at serve time.
//!
//! Output order: min-max scaled numerics, one-hot nominal blocks (first sorted
//! category dropped), ordinal codes, then passthrough columns.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::features::{FeatureColumn, FeatureRecord, FeatureValue};

pub const TRAFFIC_ORDER: [&str; 4] = ["low", "medium", "high", "jam"];
pub const DISTANCE_TYPE_ORDER: [&str; 4] = ["short", "medium", "long", "very_long"];

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("cannot fit preprocessor on zero rows")]
    EmptyFit,
    #[error("column {column} is not numeric")]
    NotNumeric { column: &'static str },
    #[error("column {column} is not categorical")]
    NotCategorical { column: &'static str },
    #[error("unknown category '{value}' for ordinal column {column}")]
    UnknownOrdinalCategory { column: &'static str, value: String },
    #[error("invalid fitted state for column {column}: {reason}")]
    InvalidState { column: &'static str, reason: String },
}

/// Which feature columns go through which encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub numeric: Vec<FeatureColumn>,
    pub nominal: Vec<FeatureColumn>,
    pub ordinal: Vec<(FeatureColumn, Vec<String>)>,
    pub passthrough: Vec<FeatureColumn>,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            numeric: vec![
                FeatureColumn::Age,
                FeatureColumn::Ratings,
                FeatureColumn::PickupTimeMinutes,
                FeatureColumn::Distance,
            ],
            nominal: vec![
                FeatureColumn::Weather,
                FeatureColumn::TypeOfOrder,
                FeatureColumn::TypeOfVehicle,
                FeatureColumn::Festival,
                FeatureColumn::CityType,
                FeatureColumn::IsWeekend,
                FeatureColumn::OrderTimeOfDay,
            ],
            ordinal: vec![
                (FeatureColumn::Traffic, owned(&TRAFFIC_ORDER)),
                (FeatureColumn::DistanceType, owned(&DISTANCE_TYPE_ORDER)),
            ],
            passthrough: vec![FeatureColumn::VehicleCondition, FeatureColumn::MultipleDeliveries],
        }
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinMaxColumn {
    pub column: FeatureColumn,
    pub min: f64,
    pub max: f64,
}

impl MinMaxColumn {
    fn scale(&self, value: f64) -> f64 {
        let range = self.max - self.min;
        let range = if range == 0.0 { 1.0 } else { range };
        (value - self.min) / range
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneHotColumn {
    pub column: FeatureColumn,
    /// Sorted; index 0 is the dropped reference category.
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdinalColumn {
    pub column: FeatureColumn,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub numeric: Vec<MinMaxColumn>,
    pub nominal: Vec<OneHotColumn>,
    pub ordinal: Vec<OrdinalColumn>,
    pub passthrough: Vec<FeatureColumn>,
}

impl Preprocessor {
    pub fn fit(layout: &ColumnLayout, rows: &[FeatureRecord]) -> Result<Self, PreprocessError> {
        if rows.is_empty() {
            return Err(PreprocessError::EmptyFit);
        }

        let mut numeric = Vec::with_capacity(layout.numeric.len());
        for &column in &layout.numeric {
            let mut min = f64::INFINITY;
            let mut max = f64::NEG_INFINITY;
            for row in rows {
                let value = number(row, column)?;
                min = min.min(value);
                max = max.max(value);
            }
            numeric.push(MinMaxColumn { column, min, max });
        }

        let mut nominal = Vec::with_capacity(layout.nominal.len());
        for &column in &layout.nominal {
            let mut seen = BTreeSet::new();
            for row in rows {
                seen.insert(category(row, column)?);
            }
            nominal.push(OneHotColumn {
                column,
                categories: seen.into_iter().collect(),
            });
        }

        let fitted = Self {
            numeric,
            nominal,
            ordinal: layout
                .ordinal
                .iter()
                .map(|(column, categories)| OrdinalColumn {
                    column: *column,
                    categories: categories.clone(),
                })
                .collect(),
            passthrough: layout.passthrough.clone(),
        };
        fitted.validate()?;

        info!(
            component = "preprocess",
            event = "preprocess.fit.done",
            rows = rows.len(),
            output_columns = fitted.output_width()
        );

        Ok(fitted)
    }

    /// Checks fitted state loaded from outside the process.
    pub fn validate(&self) -> Result<(), PreprocessError> {
        for scaler in &self.numeric {
            if !(scaler.min.is_finite() && scaler.max.is_finite() && scaler.min <= scaler.max) {
                return Err(PreprocessError::InvalidState {
                    column: scaler.column.as_str(),
                    reason: format!("bad range [{}, {}]", scaler.min, scaler.max),
                });
            }
        }
        for encoder in &self.nominal {
            if encoder.categories.is_empty() {
                return Err(PreprocessError::InvalidState {
                    column: encoder.column.as_str(),
                    reason: "no categories".to_string(),
                });
            }
            if encoder.categories.windows(2).any(|w| w[0] >= w[1]) {
                return Err(PreprocessError::InvalidState {
                    column: encoder.column.as_str(),
                    reason: "categories must be sorted and unique".to_string(),
                });
            }
        }
        for encoder in &self.ordinal {
            let unique: BTreeSet<&String> = encoder.categories.iter().collect();
            if encoder.categories.is_empty() || unique.len() != encoder.categories.len() {
                return Err(PreprocessError::InvalidState {
                    column: encoder.column.as_str(),
                    reason: "ordinal categories must be non-empty and unique".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn output_width(&self) -> usize {
        self.numeric.len()
            + self
                .nominal
                .iter()
                .map(|encoder| encoder.categories.len() - 1)
                .sum::<usize>()
            + self.ordinal.len()
            + self.passthrough.len()
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.output_width());
        names.extend(self.numeric.iter().map(|s| s.column.as_str().to_string()));
        for encoder in &self.nominal {
            for category in encoder.categories.iter().skip(1) {
                names.push(format!("{}_{}", encoder.column.as_str(), category));
            }
        }
        names.extend(self.ordinal.iter().map(|e| e.column.as_str().to_string()));
        names.extend(self.passthrough.iter().map(|c| c.as_str().to_string()));
        names
    }

    /// Unseen nominal categories encode as all zeros; unseen ordinal ones fail.
    pub fn transform(&self, row: &FeatureRecord) -> Result<Vec<f64>, PreprocessError> {
        let mut out = Vec::with_capacity(self.output_width());

        for scaler in &self.numeric {
            out.push(scaler.scale(number(row, scaler.column)?));
        }

        for encoder in &self.nominal {
            let value = category(row, encoder.column)?;
            out.extend(
                encoder
                    .categories
                    .iter()
                    .skip(1)
                    .map(|category| if *category == value { 1.0 } else { 0.0 }),
            );
        }

        for encoder in &self.ordinal {
            let value = category(row, encoder.column)?;
            let code = encoder
                .categories
                .iter()
                .position(|category| *category == value)
                .ok_or_else(|| PreprocessError::UnknownOrdinalCategory {
                    column: encoder.column.as_str(),
                    value: value.clone(),
                })?;
            out.push(code as f64);
        }

        for &column in &self.passthrough {
            out.push(number(row, column)?);
        }

        Ok(out)
    }

    pub fn transform_batch(&self, rows: &[FeatureRecord]) -> Result<Vec<Vec<f64>>, PreprocessError> {
        rows.iter().map(|row| self.transform(row)).collect()
    }
}

fn number(row: &FeatureRecord, column: FeatureColumn) -> Result<f64, PreprocessError> {
    match row.value(column) {
        FeatureValue::Number(value) => Ok(value),
        _ => Err(PreprocessError::NotNumeric {
            column: column.as_str(),
        }),
    }
}

fn category(row: &FeatureRecord, column: FeatureColumn) -> Result<String, PreprocessError> {
    match row.value(column) {
        FeatureValue::Category(value) => Ok(value.into_owned()),
        _ => Err(PreprocessError::NotCategorical {
            column: column.as_str(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::DistanceType;
    use crate::temporal::TimeOfDay;

    fn row(age: f64, weather: &str, traffic: &str, weekend: u8) -> FeatureRecord {
        FeatureRecord {
            age,
            ratings: 4.5,
            weather: weather.to_string(),
            traffic: traffic.to_string(),
            vehicle_condition: 2,
            type_of_order: "meal".to_string(),
            type_of_vehicle: "scooter".to_string(),
            multiple_deliveries: 1.0,
            festival: "no".to_string(),
            city_type: "metropolitian".to_string(),
            time_taken: Some(30),
            is_weekend: weekend,
            pickup_time_minutes: 10.0,
            order_time_of_day: TimeOfDay::Evening,
            distance: 7.5,
            distance_type: DistanceType::Medium,
        }
    }

    fn fitted() -> Preprocessor {
        let rows = vec![
            row(20.0, "sunny", "low", 0),
            row(40.0, "fog", "jam", 1),
            row(30.0, "stormy", "medium", 0),
        ];
        Preprocessor::fit(&ColumnLayout::default(), &rows).expect("fit should succeed")
    }

    #[test]
    fn feature_names_follow_block_order() {
        let pre = fitted();
        let names = pre.feature_names();

        assert_eq!(names.len(), pre.output_width());
        assert_eq!(&names[..4], &["age", "ratings", "pickup_time_minutes", "distance"]);
        assert_eq!(&names[4..6], &["weather_stormy", "weather_sunny"]);
        assert!(names.contains(&"is_weekend_1".to_string()));
        assert!(!names.contains(&"weather_fog".to_string()));
        assert_eq!(
            &names[names.len() - 4..],
            &["traffic", "distance_type", "vehicle_condition", "multiple_deliveries"]
        );
    }

    #[test]
    fn transform_scales_encodes_and_passes_through() {
        let pre = fitted();
        let names = pre.feature_names();
        let out = pre.transform(&row(30.0, "sunny", "jam", 1)).expect("transform");

        let at = |name: &str| out[names.iter().position(|n| n == name).expect(name)];
        assert_eq!(at("age"), 0.5);
        // single observed value: zero range scales with 1
        assert_eq!(at("ratings"), 0.0);
        assert_eq!(at("weather_sunny"), 1.0);
        assert_eq!(at("weather_stormy"), 0.0);
        assert_eq!(at("is_weekend_1"), 1.0);
        assert_eq!(at("traffic"), 3.0);
        assert_eq!(at("distance_type"), 1.0);
        assert_eq!(at("vehicle_condition"), 2.0);
    }

    #[test]
    fn unseen_nominal_is_all_zero_but_unseen_ordinal_fails() {
        let pre = fitted();
        let names = pre.feature_names();
        let out = pre.transform(&row(30.0, "sandstorms", "low", 0)).expect("transform");
        for (name, value) in names.iter().zip(&out) {
            if name.starts_with("weather_") {
                assert_eq!(*value, 0.0, "{name}");
            }
        }

        assert!(matches!(
            pre.transform(&row(30.0, "sunny", "gridlock", 0)),
            Err(PreprocessError::UnknownOrdinalCategory { column: "traffic", .. })
        ));
    }

    #[test]
    fn empty_fit_and_tampered_state_are_rejected() {
        assert!(matches!(
            Preprocessor::fit(&ColumnLayout::default(), &[]),
            Err(PreprocessError::EmptyFit)
        ));

        let mut pre = fitted();
        pre.nominal[0].categories.reverse();
        assert!(matches!(pre.validate(), Err(PreprocessError::InvalidState { .. })));

        let json = serde_json::to_string(&fitted()).expect("serialize");
        let back: Preprocessor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, fitted());
    }
}
