//! Raw record model and field-name normalization.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;

/// A loosely typed raw value, as received from CSV or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Number(f64),
    Text(String),
    Missing,
}

impl RawValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Text rendering of the value; numbers use the shortest round-trip form.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Text(text) => Some(Cow::Borrowed(text.as_str())),
            Self::Number(number) => Some(Cow::Owned(number.to_string())),
            Self::Missing => None,
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// One delivery event keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, RawValue>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<RawValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<RawValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<RawValue> {
        self.fields.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&RawValue> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Lower-cases field names and maps them onto the pipeline vocabulary.
#[derive(Debug, Clone)]
pub struct SchemaNormalizer {
    renames: HashMap<String, String>,
}

impl SchemaNormalizer {
    pub fn new(cfg: &PipelineConfig) -> Self {
        Self {
            renames: cfg
                .rename_table
                .iter()
                .map(|rule| (rule.from.clone(), rule.to.clone()))
                .collect(),
        }
    }

    pub fn field_name(&self, raw_name: &str) -> String {
        let lowered = raw_name.to_lowercase();
        match self.renames.get(&lowered) {
            Some(renamed) => renamed.clone(),
            None => lowered,
        }
    }

    /// Unknown columns pass through with a lower-cased name.
    pub fn normalize(&self, record: &RawRecord) -> RawRecord {
        RawRecord {
            fields: record
                .fields
                .iter()
                .map(|(key, value)| (self.field_name(key), value.clone()))
                .collect(),
        }
    }
}
