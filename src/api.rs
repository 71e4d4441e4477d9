//! HTTP handlers for the route service.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::AppState;
use crate::error::{ApiError, RouteError};
use crate::model::{Checkpoint, Coordinate, EmergencyContact, Incident, IncidentType, RouteResult, Severity};
use crate::safety::{SafetyMap, SafetyModel};
use crate::seed::EMERGENCY_CONTACTS;

const MAX_DESCRIPTION_CHARS: usize = 1_000;

// --- API DTOs ---

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    start_lat: Option<f64>,
    start_lng: Option<f64>,
    end_lat: Option<f64>,
    end_lng: Option<f64>,
}

impl RouteRequest {
    fn validate(&self) -> Result<(Coordinate, Coordinate), RouteError> {
        let start = Coordinate::validated(
            required(self.start_lat, "start_lat")?,
            required(self.start_lng, "start_lng")?,
            "start_lat",
            "start_lng",
        )?;
        let end = Coordinate::validated(
            required(self.end_lat, "end_lat")?,
            required(self.end_lng, "end_lng")?,
            "end_lat",
            "end_lng",
        )?;
        Ok((start, end))
    }
}

#[derive(Debug, Deserialize)]
pub struct IncidentReport {
    lat: Option<f64>,
    lng: Option<f64>,
    incident_type: Option<String>,
    severity: Option<i64>,
    description: Option<String>,
}

impl IncidentReport {
    fn into_incident(self, now: DateTime<Utc>) -> Result<Incident, RouteError> {
        let coord = Coordinate::validated(required(self.lat, "lat")?, required(self.lng, "lng")?, "lat", "lng")?;
        let incident_type: IncidentType = required(self.incident_type, "incident_type")?.parse()?;
        let severity = Severity::try_from(required(self.severity, "severity")?)?;
        let description = self
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_CHARS)
        {
            return Err(RouteError::validation(
                "description",
                format!("description is limited to {MAX_DESCRIPTION_CHARS} characters"),
            ));
        }
        Ok(Incident::new(coord, incident_type, severity, description, now))
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    total_incidents: usize,
    total_tollgates: usize,
    high_risk_areas: usize,
    safe_routes_calculated: u64,
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, RouteError> {
    value.ok_or_else(|| RouteError::validation(field, "field is required"))
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, RouteError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| RouteError::validation("body", rejection.body_text()))
}

/// Start of the current UTC day; incident ages are measured from here so a
/// route request is reproducible for the rest of the day.
fn risk_epoch(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::default()).and_utc()
}

// --- Handlers ---

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "SafestPath API - Women's Safety Route System" }))
}

/// `GET /api/incidents`
pub async fn list_incidents(State(state): State<Arc<AppState>>) -> Json<Vec<Incident>> {
    let snapshot = state.engine.geo().snapshot();
    Json(snapshot.incidents().cloned().collect())
}

/// `POST /api/incidents`
///
/// Anonymous: nothing about the caller is recorded.
pub async fn create_incident(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<IncidentReport>, JsonRejection>,
) -> Result<Json<Incident>, ApiError> {
    let incident = body(payload)?.into_incident(Utc::now())?;

    let published = incident.clone();
    let version = tokio::task::spawn_blocking(move || {
        let store = Arc::clone(&state.store);
        state
            .engine
            .geo()
            .insert_incident_with(published, |i| store.append(i))
    })
    .await
    .map_err(|e| RouteError::Internal(format!("incident insertion task failed: {e}")))??;

    tracing::info!(
        id = %incident.id,
        incident_type = %incident.incident_type,
        severity = incident.severity.value(),
        version,
        "incident reported"
    );
    Ok(Json(incident))
}

/// `GET /api/tollgates`
pub async fn list_tollgates(State(state): State<Arc<AppState>>) -> Json<Vec<Checkpoint>> {
    let snapshot = state.engine.geo().snapshot();
    Json(snapshot.checkpoints().cloned().collect())
}

/// `GET /api/emergency-contacts`
pub async fn emergency_contacts() -> Json<&'static [EmergencyContact]> {
    Json(EMERGENCY_CONTACTS.as_slice())
}

/// `POST /api/routes/calculate`
pub async fn calculate_route(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RouteRequest>, JsonRejection>,
) -> Result<Json<RouteResult>, ApiError> {
    let (start, end) = body(payload)?.validate()?;
    let as_of = risk_epoch(Utc::now());

    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || engine.calculate(start, end, as_of))
        .await
        .map_err(|e| RouteError::Internal(format!("route task failed: {e}")))??;

    state.routes_calculated.fetch_add(1, Ordering::Relaxed);
    Ok(Json(result))
}

/// `GET /api/stats`
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let snapshot = state.engine.geo().snapshot();
    let params = state.engine.params();
    let model = SafetyModel::new(params, Utc::now());
    let map = SafetyMap::from_snapshot(&snapshot, &model);

    Json(StatsResponse {
        total_incidents: snapshot.incident_count(),
        total_tollgates: snapshot.checkpoint_count(),
        high_risk_areas: map.high_risk_areas(params.high_risk_cell_threshold),
        safe_routes_calculated: state.routes_calculated.load(Ordering::Relaxed),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Timelike};

    use super::*;

    #[test]
    fn risk_epoch_truncates_to_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let epoch = risk_epoch(now);
        assert_eq!(epoch.date_naive(), now.date_naive());
        assert_eq!(epoch.hour(), 0);
        assert_eq!(epoch.minute(), 0);
    }

    #[test]
    fn missing_route_field_is_named() {
        let req = RouteRequest {
            start_lat: Some(19.0),
            start_lng: Some(72.8),
            end_lat: None,
            end_lng: Some(72.9),
        };
        match req.validate().unwrap_err() {
            RouteError::Validation { field, .. } => assert_eq!(field, "end_lat"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn report_with_bad_severity_is_rejected() {
        let report = IncidentReport {
            lat: Some(19.0),
            lng: Some(72.8),
            incident_type: Some("theft".into()),
            severity: Some(7),
            description: None,
        };
        match report.into_incident(Utc::now()).unwrap_err() {
            RouteError::Validation { field, .. } => assert_eq!(field, "severity"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_description_is_dropped() {
        let report = IncidentReport {
            lat: Some(19.0),
            lng: Some(72.8),
            incident_type: Some("other".into()),
            severity: Some(1),
            description: Some("   ".into()),
        };
        let incident = report.into_incident(Utc::now()).unwrap();
        assert!(incident.description.is_none());
        assert!(incident.anonymous);
    }
}
