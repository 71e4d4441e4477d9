//! Incident risk and checkpoint influence models.
//!
//! Curves (all distances in meters, ages in days):
//!
//! ```text
//! decay(d)      = 1 - (1 - decay_floor) * d / R_i       for d <= R_i, else 0
//! recency(a)    = floor + (1 - floor) * 0.5^(a / half_life)
//! raw           = sum(severity * decay * recency)
//! risk_weight   = base * M * raw / (raw + saturation)   (always < M * base)
//! proximity(d)  = bonus * (1 - d / R_c)                 for d <= R_c, else 0
//! discount      = base * min(max_discount_ratio, sum(proximity))
//! blended       = max(epsilon, base + risk_weight - discount)
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use h3o::{CellIndex, LatLng, Resolution};

use crate::config::RoutingParams;
use crate::geo_index::GeoSnapshot;
use crate::model::{Coordinate, Incident};

/// Risk and discount attached to one edge for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeAnnotation {
    pub risk_weight: f64,
    pub discount: f64,
    /// Sequence numbers of the incidents that contributed.
    pub incidents: Vec<u64>,
    /// Sequence numbers of the checkpoints within range.
    pub checkpoints: Vec<u64>,
}

/// Evaluates both models against one snapshot at a fixed instant.
pub struct SafetyModel<'a> {
    params: &'a RoutingParams,
    as_of: DateTime<Utc>,
}

impl<'a> SafetyModel<'a> {
    pub fn new(params: &'a RoutingParams, as_of: DateTime<Utc>) -> Self {
        Self { params, as_of }
    }

    pub fn params(&self) -> &RoutingParams {
        self.params
    }

    pub fn decay(&self, distance_m: f64) -> f64 {
        let r = self.params.incident_radius_m;
        if distance_m > r {
            return 0.0;
        }
        1.0 - (1.0 - self.params.decay_floor) * (distance_m.max(0.0) / r)
    }

    pub fn recency(&self, age_days: f64) -> f64 {
        let floor = self.params.recency_floor;
        let fresh = 0.5_f64.powf(age_days.max(0.0) / self.params.recency_half_life_days);
        floor + (1.0 - floor) * fresh
    }

    pub fn proximity(&self, distance_m: f64) -> f64 {
        let r = self.params.checkpoint_radius_m;
        if distance_m > r {
            return 0.0;
        }
        self.params.checkpoint_bonus * (1.0 - distance_m.max(0.0) / r)
    }

    fn is_expired(&self, incident: &Incident) -> bool {
        self.params
            .incident_max_age_days
            .is_some_and(|max| incident.age_days(self.as_of) > max)
    }

    /// Severity-weighted, decayed contribution of a single incident.
    pub fn incident_risk(&self, incident: &Incident, distance_m: f64) -> f64 {
        f64::from(incident.severity.value()) * self.decay(distance_m) * self.recency(incident.age_days(self.as_of))
    }

    pub fn annotate(&self, snapshot: &GeoSnapshot, midpoint: Coordinate, base_cost: f64) -> EdgeAnnotation {
        let mut raw = 0.0;
        let mut incidents = Vec::new();
        for (distance, entry) in snapshot.incidents_within(midpoint, self.params.incident_radius_m) {
            if self.is_expired(&entry.item) {
                continue;
            }
            raw += self.incident_risk(&entry.item, distance);
            incidents.push(entry.seq);
        }

        let mut proximity = 0.0;
        let mut checkpoints = Vec::new();
        for (distance, entry) in snapshot.checkpoints_within(midpoint, self.params.checkpoint_radius_m) {
            proximity += self.proximity(distance);
            checkpoints.push(entry.seq);
        }

        let normalized = raw / (raw + self.params.risk_saturation);
        EdgeAnnotation {
            risk_weight: base_cost * self.params.max_risk_multiplier * normalized,
            discount: base_cost * proximity.min(self.params.max_discount_ratio),
            incidents,
            checkpoints,
        }
    }

    pub fn blended_cost(&self, base_cost: f64, annotation: &EdgeAnnotation) -> f64 {
        (base_cost + annotation.risk_weight - annotation.discount).max(self.params.epsilon)
    }
}

/// H3 resolution used to cluster incidents into areas (~0.74 km² cells).
const AREA_RESOLUTION: Resolution = Resolution::Eight;

/// Aggregated incident risk per hexagonal cell.
pub struct SafetyMap {
    cells: HashMap<CellIndex, f64>,
}

impl SafetyMap {
    pub fn from_snapshot(snapshot: &GeoSnapshot, model: &SafetyModel<'_>) -> Self {
        let mut cells = HashMap::new();
        for incident in snapshot.incidents() {
            if model.is_expired(incident) {
                continue;
            }
            let Ok(ll) = LatLng::new(incident.lat, incident.lng) else {
                continue;
            };
            let weight = f64::from(incident.severity.value()) * model.recency(incident.age_days(model.as_of));
            *cells.entry(ll.to_cell(AREA_RESOLUTION)).or_insert(0.0) += weight;
        }
        Self { cells }
    }

    /// Number of cells whose aggregated risk reaches `threshold`.
    pub fn high_risk_areas(&self, threshold: f64) -> usize {
        self.cells.values().filter(|&&risk| risk >= threshold).count()
    }
}
