//! Business-rule row exclusion (underage riders, impossible ratings).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::schema::{RawRecord, RawValue};

const ID_COLUMN: &str = "id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Exclusion {
    Underage { age: f64 },
    InvalidRating { rating: String },
}

impl Exclusion {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Underage { .. } => "underage_rider",
            Self::InvalidRating { .. } => "invalid_rating",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RowFilter {
    min_age: f64,
    invalid_rating: String,
    missing_tokens: Vec<String>,
}

impl RowFilter {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            min_age: cfg.min_rider_age,
            invalid_rating: cfg.invalid_rating_literal.clone(),
            missing_tokens: cfg.missing_tokens.clone(),
        }
    }

    /// A missing or non-numeric age is not a policy exclusion; canonicalization
    /// decides what happens to it.
    pub fn check(&self, record: &RawRecord) -> Option<Exclusion> {
        if let Some(age) = record.get("age").and_then(|value| self.numeric(value)) {
            if age < self.min_age {
                return Some(Exclusion::Underage { age });
            }
        }

        // Literal text match only: a numeric 6.0 or the text "6.0" survives.
        if let Some(RawValue::Text(rating)) = record.get("ratings") {
            if *rating == self.invalid_rating {
                return Some(Exclusion::InvalidRating {
                    rating: rating.clone(),
                });
            }
        }

        None
    }

    /// Excluded row indices, computed before any row is transformed.
    pub fn plan(&self, records: &[RawRecord]) -> BTreeMap<usize, Exclusion> {
        let plan: BTreeMap<usize, Exclusion> = records
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| self.check(record).map(|exclusion| (idx, exclusion)))
            .collect();

        debug!(
            component = "filter",
            event = "filter.plan.built",
            input_rows = records.len(),
            excluded_rows = plan.len()
        );

        plan
    }

    /// Keeps the rows not in `plan`, with their original index, minus the `id` column.
    pub fn retain(
        &self,
        records: &[RawRecord],
        plan: &BTreeMap<usize, Exclusion>,
    ) -> Vec<(usize, RawRecord)> {
        records
            .iter()
            .enumerate()
            .filter(|(idx, _)| !plan.contains_key(idx))
            .map(|(idx, record)| (idx, self.strip_id(record.clone())))
            .collect()
    }

    pub fn strip_id(&self, mut record: RawRecord) -> RawRecord {
        record.remove(ID_COLUMN);
        record
    }

    fn numeric(&self, value: &RawValue) -> Option<f64> {
        match value {
            RawValue::Number(number) => Some(*number),
            RawValue::Text(text) if self.missing_tokens.iter().any(|t| t == text) => None,
            RawValue::Text(text) => text.trim().parse::<f64>().ok(),
            RawValue::Missing => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> RowFilter {
        RowFilter::new(&PipelineConfig::default())
    }

    fn record(age: RawValue, rating: RawValue) -> RawRecord {
        let mut r = RawRecord::new();
        r.insert("id", "0x4607");
        r.insert("age", age);
        r.insert("ratings", rating);
        r
    }

    #[test]
    fn age_boundary_is_inclusive_at_eighteen() {
        let f = filter();
        assert_eq!(f.check(&record(RawValue::text("18"), RawValue::text("4.5"))), None);
        assert_eq!(f.check(&record(RawValue::Number(18.0), RawValue::text("4.5"))), None);
        assert_eq!(
            f.check(&record(RawValue::text("17.999"), RawValue::text("4.5"))),
            Some(Exclusion::Underage { age: 17.999 })
        );
    }

    #[test]
    fn only_the_literal_six_rating_is_excluded() {
        let f = filter();
        assert!(matches!(
            f.check(&record(RawValue::text("30"), RawValue::text("6"))),
            Some(Exclusion::InvalidRating { .. })
        ));
        assert_eq!(f.check(&record(RawValue::text("30"), RawValue::text("6.0"))), None);
        assert_eq!(f.check(&record(RawValue::text("30"), RawValue::Number(6.0))), None);
        assert_eq!(f.check(&record(RawValue::text("30"), RawValue::Number(5.9))), None);
    }

    #[test]
    fn missing_or_garbled_age_is_left_to_canonicalization() {
        let f = filter();
        assert_eq!(f.check(&record(RawValue::text("NaN "), RawValue::text("4.5"))), None);
        assert_eq!(f.check(&record(RawValue::text("abc"), RawValue::text("4.5"))), None);
        assert_eq!(f.check(&record(RawValue::Missing, RawValue::text("4.5"))), None);
    }

    #[test]
    fn retain_keeps_original_indices_and_drops_id() {
        let f = filter();
        let records = vec![
            record(RawValue::text("25"), RawValue::text("4.5")),
            record(RawValue::text("15"), RawValue::text("4.5")),
            record(RawValue::text("33"), RawValue::text("6")),
            record(RawValue::text("40"), RawValue::text("4.9")),
        ];

        let plan = f.plan(&records);
        assert_eq!(plan.keys().copied().collect::<Vec<_>>(), vec![1, 2]);

        let kept = f.retain(&records, &plan);
        assert_eq!(kept.iter().map(|(idx, _)| *idx).collect::<Vec<_>>(), vec![0, 3]);
        assert!(kept.iter().all(|(_, r)| !r.contains("id")));
    }
}
