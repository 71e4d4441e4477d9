//! Reference data shipped with the service.

use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

use crate::model::{Checkpoint, Coordinate, EmergencyContact, Incident, IncidentType, Severity};

lazy_static! {
    pub static ref EMERGENCY_CONTACTS: Vec<EmergencyContact> = vec![
        EmergencyContact {
            name: "National Women Helpline",
            number: "181",
            description: "24x7 support for women in distress",
        },
        EmergencyContact {
            name: "National Emergency Number",
            number: "112",
            description: "All emergency services (Police, Fire, Medical)",
        },
        EmergencyContact {
            name: "Women in Distress",
            number: "1091",
            description: "Women helpline for immediate assistance",
        },
        EmergencyContact {
            name: "Police",
            number: "100",
            description: "Direct police emergency line",
        },
    ];
}

/// Mumbai incidents used to populate an empty store.
pub fn sample_incidents(now: DateTime<Utc>) -> Vec<Incident> {
    let rows: [(f64, f64, IncidentType, u8, &str); 8] = [
        (19.0760, 72.8777, IncidentType::Harassment, 4, "Street harassment reported"),
        (19.0896, 72.8656, IncidentType::Theft, 3, "Chain snatching"),
        (19.0330, 72.8569, IncidentType::UnsafeZone, 2, "Poor lighting"),
        (19.1136, 72.8697, IncidentType::Assault, 5, "Physical assault reported"),
        (19.0176, 72.8561, IncidentType::Harassment, 3, "Verbal harassment"),
        (18.9388, 72.8354, IncidentType::UnsafeZone, 4, "Isolated area"),
        (19.0728, 72.8826, IncidentType::Theft, 3, "Bag snatching"),
        (19.0520, 72.8720, IncidentType::Harassment, 2, "Catcalling"),
    ];
    rows.into_iter()
        .filter_map(|(lat, lng, kind, severity, description)| {
            let severity = Severity::try_from(i64::from(severity)).ok()?;
            Some(Incident::new(
                Coordinate::new(lat, lng),
                kind,
                severity,
                Some(description.to_string()),
                now,
            ))
        })
        .collect()
}

/// Mumbai toll gates used when no checkpoint file is configured.
pub fn sample_checkpoints() -> Vec<Checkpoint> {
    [
        (19.0550, 72.8700, "Eastern Express Highway Toll"),
        (19.0900, 72.8600, "Western Express Highway Toll"),
        (19.0200, 72.8450, "Bandra-Worli Sea Link Toll"),
        (19.1000, 72.8800, "Mulund Toll Plaza"),
        (18.9500, 72.8300, "South Mumbai Checkpoint"),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (lat, lng, name))| Checkpoint {
        id: format!("tollgate-{}", i + 1),
        lat,
        lng,
        name: name.to_string(),
        monitored: true,
    })
    .collect()
}

/// Reads a JSON array of checkpoints, rejecting out-of-range coordinates.
pub fn load_checkpoints(path: &Path) -> anyhow::Result<Vec<Checkpoint>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading checkpoints from {}", path.display()))?;
    let checkpoints: Vec<Checkpoint> =
        serde_json::from_str(&raw).with_context(|| format!("parsing checkpoints in {}", path.display()))?;
    if let Some(bad) = checkpoints.iter().find(|c| !c.coordinate().is_valid()) {
        anyhow::bail!("checkpoint {} has an out-of-range coordinate", bad.id);
    }
    Ok(checkpoints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_data_is_valid() {
        let incidents = sample_incidents(Utc::now());
        assert_eq!(incidents.len(), 8);
        assert!(incidents.iter().all(|i| i.coordinate().is_valid()));

        let gates = sample_checkpoints();
        assert_eq!(gates.len(), 5);
        assert_eq!(gates[3].name, "Mulund Toll Plaza");
    }

    #[test]
    fn emergency_contacts_include_national_number() {
        assert!(EMERGENCY_CONTACTS.iter().any(|c| c.number == "112"));
    }

    #[test]
    fn checkpoint_file_rejects_bad_coordinates() {
        let path = std::env::temp_dir().join(format!("safe_route-gates-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"[{"id": "x", "lat": 123.0, "lng": 72.0, "name": "Bad"}]"#).unwrap();
        assert!(load_checkpoints(&path).is_err());
        let _ = fs::remove_file(path);
    }
}
