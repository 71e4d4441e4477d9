//! Radius lookups over incidents and checkpoints.
//!
//! Both layers are R-trees keyed on `[lng, lat]`. Incidents arrive while
//! requests are in flight, so the index publishes immutable [`GeoSnapshot`]s:
//! a request clones one `Arc` and keeps a consistent view for its whole
//! lifetime, while a writer prepares the next snapshot and swaps it in.
//!
//! New incidents land in a short `tail` that is scanned linearly. Once the
//! tail grows past [`LINEAR_SCAN_THRESHOLD`] it is merged into a freshly
//! bulk-loaded tree, so the tree rebuild cost is amortised over many inserts.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use itertools::Itertools;
use rstar::primitives::GeomWithData;
use rstar::{AABB, RTree};

use crate::model::{Checkpoint, Coordinate, Incident};

/// Largest number of entries kept outside the R-tree.
pub const LINEAR_SCAN_THRESHOLD: usize = 256;

/// An indexed entity with its insertion sequence number.
#[derive(Debug)]
pub struct Located<T> {
    pub seq: u64,
    pub coord: Coordinate,
    pub item: T,
}

type Entry<T> = Arc<Located<T>>;
type TreePoint<T> = GeomWithData<[f64; 2], Entry<T>>;

struct Layer<T> {
    tree: Arc<RTree<TreePoint<T>>>,
    tail: Vec<Entry<T>>,
}

impl<T> Clone for Layer<T> {
    fn clone(&self) -> Self {
        Self {
            tree: Arc::clone(&self.tree),
            tail: self.tail.clone(),
        }
    }
}

impl<T> Layer<T> {
    fn bulk(entries: Vec<Entry<T>>) -> Self {
        let points = entries
            .into_iter()
            .map(|e| GeomWithData::new([e.coord.lng, e.coord.lat], e))
            .collect();
        Self {
            tree: Arc::new(RTree::bulk_load(points)),
            tail: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.tree.size() + self.tail.len()
    }

    fn with(&self, entry: Entry<T>) -> Self {
        let mut next = self.clone();
        next.tail.push(entry);
        if next.tail.len() > LINEAR_SCAN_THRESHOLD {
            let merged = next
                .tree
                .iter()
                .map(|p| Arc::clone(&p.data))
                .chain(next.tail.drain(..))
                .collect();
            return Self::bulk(merged);
        }
        next
    }

    /// Entries within `radius_m` of `center`, in insertion order, with their distance.
    fn within(&self, center: Coordinate, radius_m: f64) -> Vec<(f64, &Entry<T>)> {
        center
            .envelopes(radius_m)
            .into_iter()
            .flat_map(|(min, max)| self.tree.locate_in_envelope(&AABB::from_corners(min, max)))
            .map(|p| &p.data)
            .chain(self.tail.iter())
            .filter_map(|e| {
                let d = center.haversine_m(&e.coord);
                (d <= radius_m).then_some((d, e))
            })
            .sorted_by_key(|(_, e)| e.seq)
            .collect()
    }

    fn all(&self) -> Vec<&Entry<T>> {
        self.tree
            .iter()
            .map(|p| &p.data)
            .chain(self.tail.iter())
            .sorted_by_key(|e| e.seq)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Incident,
    Checkpoint,
}

#[derive(Debug, Clone)]
pub enum GeoEntity {
    Incident(Arc<Located<Incident>>),
    Checkpoint(Arc<Located<Checkpoint>>),
}

/// Immutable view of all indexed entities. Cheap to clone.
#[derive(Clone)]
pub struct GeoSnapshot {
    version: u64,
    next_seq: u64,
    incidents: Layer<Incident>,
    checkpoints: Layer<Checkpoint>,
}

impl GeoSnapshot {
    /// Incremented on every published insertion.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn incident_count(&self) -> usize {
        self.incidents.len()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn incidents_within(&self, center: Coordinate, radius_m: f64) -> Vec<(f64, &Arc<Located<Incident>>)> {
        self.incidents.within(center, radius_m)
    }

    pub fn checkpoints_within(&self, center: Coordinate, radius_m: f64) -> Vec<(f64, &Arc<Located<Checkpoint>>)> {
        self.checkpoints.within(center, radius_m)
    }

    pub fn query(&self, center: Coordinate, radius_m: f64, kind: EntityKind) -> Vec<GeoEntity> {
        match kind {
            EntityKind::Incident => self
                .incidents_within(center, radius_m)
                .into_iter()
                .map(|(_, e)| GeoEntity::Incident(Arc::clone(e)))
                .collect(),
            EntityKind::Checkpoint => self
                .checkpoints_within(center, radius_m)
                .into_iter()
                .map(|(_, e)| GeoEntity::Checkpoint(Arc::clone(e)))
                .collect(),
        }
    }

    /// Every incident in the order it was reported.
    pub fn incidents(&self) -> impl Iterator<Item = &Incident> {
        self.incidents.all().into_iter().map(|e| &e.item)
    }

    pub fn checkpoints(&self) -> impl Iterator<Item = &Checkpoint> {
        self.checkpoints.all().into_iter().map(|e| &e.item)
    }
}

/// Shared, concurrently readable index with atomic incident publication.
pub struct GeoIndex {
    current: RwLock<Arc<GeoSnapshot>>,
    // Serialises writers so two inserts never build from the same base snapshot.
    writer: Mutex<()>,
}

impl GeoIndex {
    pub fn new(checkpoints: Vec<Checkpoint>, incidents: Vec<Incident>) -> Self {
        let checkpoints = checkpoints
            .into_iter()
            .enumerate()
            .map(|(i, c)| {
                Arc::new(Located {
                    seq: i as u64,
                    coord: c.coordinate(),
                    item: c,
                })
            })
            .collect();
        let incidents: Vec<_> = incidents
            .into_iter()
            .enumerate()
            .map(|(i, inc)| {
                Arc::new(Located {
                    seq: i as u64,
                    coord: inc.coordinate(),
                    item: inc,
                })
            })
            .collect();
        let next_seq = incidents.len() as u64;

        let snapshot = GeoSnapshot {
            version: 0,
            next_seq,
            incidents: Layer::bulk(incidents),
            checkpoints: Layer::bulk(checkpoints),
        };
        tracing::info!(
            incidents = snapshot.incident_count(),
            checkpoints = snapshot.checkpoint_count(),
            "geo index built"
        );

        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> Arc<GeoSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Publishes `incident` to all subsequent snapshots.
    pub fn insert_incident(&self, incident: Incident) -> u64 {
        match self.insert_incident_with(incident, |_| Ok::<(), Infallible>(())) {
            Ok(version) => version,
            Err(never) => match never {},
        }
    }

    /// Runs `persist` under the writer lock and publishes only if it succeeds,
    /// so storage order matches publication order.
    pub fn insert_incident_with<E>(
        &self,
        incident: Incident,
        persist: impl FnOnce(&Incident) -> Result<(), E>,
    ) -> Result<u64, E> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        persist(&incident)?;
        let base = self.snapshot();

        let entry = Arc::new(Located {
            seq: base.next_seq,
            coord: incident.coordinate(),
            item: incident,
        });
        let next = GeoSnapshot {
            version: base.version + 1,
            next_seq: base.next_seq + 1,
            incidents: base.incidents.with(entry),
            checkpoints: base.checkpoints.clone(),
        };
        let version = next.version;

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        tracing::debug!(version, "incident published");
        Ok(version)
    }
}
