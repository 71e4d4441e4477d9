//! Durable, append-only incident storage.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::StoreError;
use crate::model::Incident;

/// Where accepted incident reports are persisted before they become visible.
pub trait IncidentStore: Send + Sync {
    /// All stored incidents in the order they were appended.
    fn load(&self) -> Result<Vec<Incident>, StoreError>;

    fn append(&self, incident: &Incident) -> Result<(), StoreError>;
}

/// Keeps nothing; incidents live only in the geo index.
pub struct MemoryStore;

impl IncidentStore for MemoryStore {
    fn load(&self) -> Result<Vec<Incident>, StoreError> {
        Ok(Vec::new())
    }

    fn append(&self, _incident: &Incident) -> Result<(), StoreError> {
        Ok(())
    }
}

/// One JSON document per line, flushed and synced on every append.
pub struct JsonLinesStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl IncidentStore for JsonLinesStore {
    fn load(&self) -> Result<Vec<Incident>, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut incidents = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let incident = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                line: i + 1,
                message: e.to_string(),
            })?;
            incidents.push(incident);
        }
        tracing::info!(path = %self.path.display(), incidents = incidents.len(), "incident log replayed");
        Ok(incidents)
    }

    fn append(&self, incident: &Incident) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(incident)?;
        line.push(b'\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)?;
        file.sync_data()?;
        Ok(())
    }
}
