//! Field canonicalization: missing tokens, type coercion and string cleanup.

use std::borrow::Cow;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::schema::{RawRecord, RawValue};

/// Fields the canonicalizer understands; anything else is dropped here.
pub const CANONICAL_FIELDS: [&str; 20] = [
    "rider_id",
    "age",
    "ratings",
    "restaurant_latitude",
    "restaurant_longitude",
    "delivery_latitude",
    "delivery_longitude",
    "order_date",
    "order_time",
    "order_picked_time",
    "weather",
    "traffic",
    "vehicle_condition",
    "type_of_order",
    "type_of_vehicle",
    "multiple_deliveries",
    "festival",
    "city_type",
    "time_taken",
    "id",
];

const DATE_FORMATS: [&str; 4] = ["%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d"];
const TIME_FORMATS: [&str; 5] = ["%H:%M:%S", "%H:%M:%S%.f", "%H:%M", "%I:%M:%S %p", "%I:%M %p"];

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("field {field} value '{value}' is not a valid {expected}")]
pub struct MalformedField {
    pub field: String,
    pub value: String,
    pub expected: String,
}

impl MalformedField {
    fn new(field: &str, value: &str, expected: &str) -> Self {
        Self {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Training target state: absent from the input, present but missing, or parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    NotProvided,
    Missing,
    Minutes(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalRecord {
    pub rider_id: Option<String>,
    pub city_name: Option<String>,
    pub age: Option<f64>,
    pub ratings: Option<f64>,
    pub restaurant_latitude: Option<f64>,
    pub restaurant_longitude: Option<f64>,
    pub delivery_latitude: Option<f64>,
    pub delivery_longitude: Option<f64>,
    pub order_date: Option<NaiveDate>,
    pub order_time: Option<NaiveTime>,
    pub order_picked_time: Option<NaiveTime>,
    pub weather: Option<String>,
    pub traffic: Option<String>,
    pub vehicle_condition: Option<i64>,
    pub type_of_order: Option<String>,
    pub type_of_vehicle: Option<String>,
    pub multiple_deliveries: Option<f64>,
    pub festival: Option<String>,
    pub city_type: Option<String>,
    pub time_taken: Target,
}

#[derive(Debug, Clone)]
pub struct Canonicalizer {
    missing_tokens: Vec<String>,
    city_delimiter: String,
    weather_prefix: String,
    weather_missing_literal: String,
    target_prefix: String,
}

impl Canonicalizer {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            missing_tokens: cfg.missing_tokens.clone(),
            city_delimiter: cfg.rider_city_delimiter.clone(),
            weather_prefix: cfg.weather_prefix.clone(),
            weather_missing_literal: cfg.weather_missing_literal.clone(),
            target_prefix: cfg.target_prefix.clone(),
        }
    }

    /// Replaces every recognized missing token with [`RawValue::Missing`].
    ///
    /// Runs before anything trims or lower-cases, so `"NaN "` can never
    /// survive as the category `"nan"`.
    pub fn resolve_missing(&self, record: &RawRecord) -> RawRecord {
        let mut out = RawRecord::new();
        for (key, value) in record.iter() {
            let resolved = match value {
                RawValue::Text(text) if self.missing_tokens.iter().any(|t| t == text) => {
                    RawValue::Missing
                }
                other => other.clone(),
            };
            out.insert(key, resolved);
        }
        out
    }

    pub fn canonicalize(&self, record: &RawRecord) -> Result<CanonicalRecord, MalformedField> {
        let record = self.resolve_missing(record);

        let unknown = record
            .keys()
            .filter(|key| !CANONICAL_FIELDS.contains(key))
            .count();
        if unknown > 0 {
            debug!(
                component = "canonical",
                event = "canonical.unknown_columns_dropped",
                unknown_columns = unknown
            );
        }

        let rider_id = text(&record, "rider_id").map(|id| id.into_owned());
        let city_name = rider_id.as_deref().and_then(|id| {
            id.split(self.city_delimiter.as_str())
                .next()
                .map(str::to_string)
        });

        Ok(CanonicalRecord {
            city_name,
            rider_id,
            age: float(&record, "age")?,
            ratings: float(&record, "ratings")?,
            restaurant_latitude: float(&record, "restaurant_latitude")?.map(f64::abs),
            restaurant_longitude: float(&record, "restaurant_longitude")?.map(f64::abs),
            delivery_latitude: float(&record, "delivery_latitude")?.map(f64::abs),
            delivery_longitude: float(&record, "delivery_longitude")?.map(f64::abs),
            order_date: date(&record, "order_date")?,
            order_time: time(&record, "order_time")?,
            order_picked_time: time(&record, "order_picked_time")?,
            weather: self.weather(&record),
            traffic: category(&record, "traffic"),
            vehicle_condition: integer(&record, "vehicle_condition")?,
            type_of_order: category(&record, "type_of_order"),
            type_of_vehicle: category(&record, "type_of_vehicle"),
            multiple_deliveries: float(&record, "multiple_deliveries")?,
            festival: category(&record, "festival"),
            city_type: category(&record, "city_type"),
            time_taken: self.target(&record)?,
        })
    }

    fn weather(&self, record: &RawRecord) -> Option<String> {
        let raw = text(record, "weather")?;
        let cleaned = raw
            .replace(self.weather_prefix.as_str(), "")
            .to_lowercase()
            .trim_end()
            .to_string();
        if cleaned.is_empty() || cleaned == self.weather_missing_literal {
            None
        } else {
            Some(cleaned)
        }
    }

    fn target(&self, record: &RawRecord) -> Result<Target, MalformedField> {
        let Some(value) = record.get("time_taken") else {
            return Ok(Target::NotProvided);
        };
        let Some(raw) = value.as_text() else {
            return Ok(Target::Missing);
        };

        let stripped = raw.strip_prefix(self.target_prefix.as_str()).unwrap_or(raw.as_ref());
        stripped
            .trim()
            .parse::<u32>()
            .map(Target::Minutes)
            .map_err(|_| MalformedField::new("time_taken", &raw, "whole number of minutes"))
    }
}

fn text<'a>(record: &'a RawRecord, field: &str) -> Option<Cow<'a, str>> {
    record.get(field).and_then(RawValue::as_text)
}

fn category(record: &RawRecord, field: &str) -> Option<String> {
    let cleaned = text(record, field)?.trim_end().to_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn float(record: &RawRecord, field: &str) -> Result<Option<f64>, MalformedField> {
    let parsed = match record.get(field) {
        None | Some(RawValue::Missing) => return Ok(None),
        Some(RawValue::Number(number)) => Some(*number),
        Some(RawValue::Text(raw)) => raw.trim().parse::<f64>().ok(),
    };

    match parsed {
        Some(number) if number.is_finite() => Ok(Some(number)),
        _ => Err(MalformedField::new(
            field,
            &text(record, field).unwrap_or_default(),
            "number",
        )),
    }
}

fn integer(record: &RawRecord, field: &str) -> Result<Option<i64>, MalformedField> {
    match float(record, field)? {
        None => Ok(None),
        Some(number) if number.fract() == 0.0 => Ok(Some(number as i64)),
        Some(number) => Err(MalformedField::new(
            field,
            &number.to_string(),
            "integer",
        )),
    }
}

fn date(record: &RawRecord, field: &str) -> Result<Option<NaiveDate>, MalformedField> {
    let Some(raw) = text(record, field) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .map(Some)
        .ok_or_else(|| MalformedField::new(field, &raw, "day-first date"))
}

fn time(record: &RawRecord, field: &str) -> Result<Option<NaiveTime>, MalformedField> {
    let Some(raw) = text(record, field) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
        .map(Some)
        .ok_or_else(|| MalformedField::new(field, &raw, "time of day"))
}
