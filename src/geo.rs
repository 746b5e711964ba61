//! Great-circle distance between restaurant and drop-off, and its bucket.

use serde::{Deserialize, Serialize};

use crate::canonical::CanonicalRecord;
use crate::config::{BinLabel, Bins};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceType {
    Short,
    Medium,
    Long,
    VeryLong,
}

impl DistanceType {
    pub const ALL: [DistanceType; 4] = [Self::Short, Self::Medium, Self::Long, Self::VeryLong];
}

impl BinLabel for DistanceType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
            Self::VeryLong => "very_long",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoFeatures {
    pub distance: Option<f64>,
    pub distance_type: Option<DistanceType>,
}

/// Haversine distance in kilometers; inputs in decimal degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64, radius_km: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // rounding can push `a` a hair above 1 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();
    radius_km * c
}

pub fn derive_geo(record: &CanonicalRecord, bins: &Bins<DistanceType>, radius_km: f64) -> GeoFeatures {
    let distance = match (
        record.restaurant_latitude,
        record.restaurant_longitude,
        record.delivery_latitude,
        record.delivery_longitude,
    ) {
        (Some(lat1), Some(lon1), Some(lat2), Some(lon2)) => {
            Some(haversine_km(lat1, lon1, lat2, lon2, radius_km))
        }
        _ => None,
    };

    GeoFeatures {
        distance,
        distance_type: distance.and_then(|km| bins.assign(km)),
    }
}
