//! Municipality location index
//!
//! Static coordinate table (municipal office locations) with great-circle
//! distance queries.

use crate::error::ConfigurationError;
use crate::models::MunicipalityCode;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

const EARTH_RADIUS_KM: f64 = 6371.0;

const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = 20.0..=50.0;
const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = 120.0..=150.0;

/// (code, latitude, longitude)
const BUILTIN_LOCATIONS: &[(&str, f64, f64)] = &[
    ("01100", 43.0621, 141.3544),
    ("04100", 38.2682, 140.8694),
    ("11100", 35.8617, 139.6455),
    ("12100", 35.6073, 140.1063),
    ("13101", 35.6940, 139.7536),
    ("13102", 35.6706, 139.7720),
    ("13103", 35.6581, 139.7516),
    ("13104", 35.6938, 139.7034),
    ("13105", 35.7081, 139.7524),
    ("13106", 35.7126, 139.7800),
    ("13107", 35.7107, 139.8015),
    ("13108", 35.6729, 139.8171),
    ("13109", 35.6092, 139.7302),
    ("13110", 35.6415, 139.6982),
    ("13111", 35.5613, 139.7160),
    ("13112", 35.6464, 139.6532),
    ("13113", 35.6640, 139.6982),
    ("13114", 35.7074, 139.6638),
    ("13115", 35.6995, 139.6364),
    ("13116", 35.7261, 139.7167),
    ("13117", 35.7528, 139.7335),
    ("13118", 35.7362, 139.7834),
    ("13119", 35.7512, 139.7093),
    ("13120", 35.7356, 139.6517),
    ("13121", 35.7750, 139.8044),
    ("13122", 35.7434, 139.8474),
    ("13123", 35.7067, 139.8683),
    ("13201", 35.6664, 139.3160),
    ("14100", 35.4437, 139.6380),
    ("14101", 35.5085, 139.6823),
    ("14130", 35.5308, 139.7029),
    ("23100", 35.1815, 136.9066),
    ("26100", 35.0116, 135.7681),
    ("27100", 34.6937, 135.5023),
    ("27123", 34.7048, 135.5748),
    ("28100", 34.6901, 135.1955),
    ("34100", 34.3853, 132.4553),
    ("40130", 33.5902, 130.4017),
];

static BUILTIN: Lazy<LocationIndex> = Lazy::new(|| {
    let points = BUILTIN_LOCATIONS
        .iter()
        .map(|&(code, lat, lng)| {
            (
                MunicipalityCode::parse(code).expect("built-in location codes are 5 digits"),
                GeoPoint { lat, lng },
            )
        })
        .collect();
    LocationIndex::from_points(points).expect("built-in locations lie within Japan")
});

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Haversine distance in kilometres
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyCity {
    pub municipality_code: MunicipalityCode,
    pub distance_km: f64,
}

#[derive(Debug, Clone)]
pub struct LocationIndex {
    points: HashMap<MunicipalityCode, GeoPoint>,
}

impl LocationIndex {
    pub fn builtin() -> &'static LocationIndex {
        &BUILTIN
    }

    pub fn from_points(points: Vec<(MunicipalityCode, GeoPoint)>) -> Result<Self, ConfigurationError> {
        let mut map = HashMap::with_capacity(points.len());
        for (code, point) in points {
            if !LATITUDE_RANGE.contains(&point.lat) || !LONGITUDE_RANGE.contains(&point.lng) {
                return Err(ConfigurationError(format!(
                    "location for {} out of range: ({}, {})",
                    code, point.lat, point.lng
                )));
            }
            if map.insert(code.clone(), point).is_some() {
                return Err(ConfigurationError(format!("duplicate location for {}", code)));
            }
        }
        Ok(Self { points: map })
    }

    pub fn resolve_location(&self, code: &MunicipalityCode) -> Option<GeoPoint> {
        self.points.get(code).copied()
    }

    /// Cities within `radius_km`, nearest first, ties by code
    ///
    /// The queried city is excluded; an unknown code yields nothing.
    pub fn nearby_cities(&self, code: &MunicipalityCode, radius_km: f64, limit: usize) -> Vec<NearbyCity> {
        let Some(origin) = self.resolve_location(code) else {
            return Vec::new();
        };

        let mut nearby: Vec<NearbyCity> = self
            .points
            .iter()
            .filter(|(other, _)| *other != code)
            .map(|(other, point)| NearbyCity {
                municipality_code: other.clone(),
                distance_km: origin.distance_km(point),
            })
            .filter(|city| city.distance_km <= radius_km)
            .collect();

        nearby.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then_with(|| a.municipality_code.cmp(&b.municipality_code))
        });
        nearby.truncate(limit);
        nearby
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
