use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use geo::prelude::*;
use geo::Point;
use serde::{Deserialize, Serialize};

use crate::error::RouteError;

/// WGS-84 position in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Builds a coordinate from request fields, naming the offending field on failure.
    pub fn validated(lat: f64, lng: f64, lat_field: &str, lng_field: &str) -> Result<Self, RouteError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(RouteError::validation(lat_field, "latitude must be within [-90, 90]"));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(RouteError::validation(lng_field, "longitude must be within [-180, 180]"));
        }
        Ok(Self { lat, lng })
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    pub fn point(&self) -> Point<f64> {
        Point::new(self.lng, self.lat)
    }

    /// Great-circle distance in meters.
    pub fn haversine_m(&self, other: &Coordinate) -> f64 {
        self.point().haversine_distance(&other.point())
    }

    pub fn midpoint(&self, other: &Coordinate) -> Coordinate {
        Coordinate::new((self.lat + other.lat) / 2.0, (self.lng + other.lng) / 2.0)
    }

    /// Axis-aligned `[lng, lat]` boxes that together contain every point
    /// within `radius_m` of `self`. A range crossing ±180° longitude is split
    /// into one box on each side.
    pub fn envelopes(&self, radius_m: f64) -> Vec<([f64; 2], [f64; 2])> {
        let d_lat = radius_m / METERS_PER_DEGREE_LAT;
        let min_lat = (self.lat - d_lat).max(-90.0);
        let max_lat = (self.lat + d_lat).min(90.0);

        // Degrees of longitude are shortest at the band's poleward edge.
        let cos_lat = min_lat.abs().max(max_lat.abs()).to_radians().cos();
        let d_lng = if cos_lat > 1e-6 {
            radius_m / (METERS_PER_DEGREE_LAT * cos_lat)
        } else {
            180.0
        };
        if d_lng >= 180.0 {
            return vec![([-180.0, min_lat], [180.0, max_lat])];
        }

        let (west, east) = (self.lng - d_lng, self.lng + d_lng);
        if west < -180.0 {
            vec![
                ([west + 360.0, min_lat], [180.0, max_lat]),
                ([-180.0, min_lat], [east, max_lat]),
            ]
        } else if east > 180.0 {
            vec![
                ([west, min_lat], [180.0, max_lat]),
                ([-180.0, min_lat], [east - 360.0, max_lat]),
            ]
        } else {
            vec![([west, min_lat], [east, max_lat])]
        }
    }
}

/// Slightly below the haversine value (~111 195 m) so envelopes never under-cover.
pub const METERS_PER_DEGREE_LAT: f64 = 110_500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    Harassment,
    Theft,
    Assault,
    UnsafeZone,
    Other,
}

impl IncidentType {
    pub const ALL: [IncidentType; 5] = [
        IncidentType::Harassment,
        IncidentType::Theft,
        IncidentType::Assault,
        IncidentType::UnsafeZone,
        IncidentType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::Harassment => "harassment",
            IncidentType::Theft => "theft",
            IncidentType::Assault => "assault",
            IncidentType::UnsafeZone => "unsafe_zone",
            IncidentType::Other => "other",
        }
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentType {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        IncidentType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                RouteError::validation(
                    "incident_type",
                    format!("unknown incident type `{s}`, expected one of harassment, theft, assault, unsafe_zone, other"),
                )
            })
    }
}

/// Reported severity, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Severity(u8);

impl Severity {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Severity {
    type Error = RouteError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (i64::from(Self::MIN)..=i64::from(Self::MAX)).contains(&value) {
            Ok(Severity(value as u8))
        } else {
            Err(RouteError::validation("severity", "severity must be between 1 and 5"))
        }
    }
}

impl From<Severity> for u8 {
    fn from(s: Severity) -> u8 {
        s.0
    }
}

/// Crowd-sourced safety report. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub incident_type: IncidentType,
    pub severity: Severity,
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "anonymous_default")]
    pub anonymous: bool,
}

fn anonymous_default() -> bool {
    true
}

impl Incident {
    pub fn new(
        coord: Coordinate,
        incident_type: IncidentType,
        severity: Severity,
        description: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            lat: coord.lat,
            lng: coord.lng,
            incident_type,
            severity,
            description,
            timestamp,
            anonymous: true,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    /// Age in fractional days relative to `as_of`; reports from the future count as fresh.
    pub fn age_days(&self, as_of: DateTime<Utc>) -> f64 {
        let secs = (as_of - self.timestamp).num_seconds().max(0);
        secs as f64 / 86_400.0
    }
}

/// Monitored location ("toll gate") treated as a safety-positive signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    #[serde(default = "monitored_default")]
    pub monitored: bool,
}

fn monitored_default() -> bool {
    true
}

impl Checkpoint {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyContact {
    pub name: &'static str,
    pub number: &'static str,
    pub description: &'static str,
}

/// Combined answer to one route request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteResult {
    pub safest_route: Vec<Coordinate>,
    pub shortest_route: Vec<Coordinate>,
    pub safety_score: u8,
    pub distance_km: f64,
    pub estimated_time_min: f64,
    pub toll_count: usize,
    pub incident_count: usize,
}
