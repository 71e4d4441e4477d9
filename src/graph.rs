use std::collections::HashMap;
use std::fs;
use std::path::Path;

use osmpbf::{Element, ElementReader};
use petgraph::graph::{EdgeIndex, Graph, NodeIndex};
use petgraph::visit::EdgeRef;
use rstar::{AABB, RTree};
use rstar::primitives::GeomWithData;
use serde::Deserialize;

use crate::error::GraphError;
use crate::model::Coordinate;

#[derive(Debug, Clone)]
pub struct RoadNode {
    /// Identifier from the source data (OSM id or JSON id).
    pub key: String,
    pub coord: Coordinate,
}

#[derive(Debug, Clone, Copy)]
pub struct RoadEdge {
    pub distance_m: f64,
    pub time_min: f64,
}

/// Read-only street network shared by every request.
pub struct NavigationGraph {
    pub graph: Graph<RoadNode, RoadEdge>,
    nodes: RTree<GeomWithData<[f64; 2], NodeIndex>>,
}

impl NavigationGraph {
    /// Loads an OSM PBF extract (`.pbf`) or a JSON graph document.
    pub fn load(path: &Path, default_speed_kmh: f64) -> Result<Self, GraphError> {
        let is_pbf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pbf"));
        if is_pbf {
            Self::from_pbf(path, default_speed_kmh)
        } else {
            let raw = fs::read_to_string(path).map_err(|source| GraphError::Io {
                path: path.display().to_string(),
                source,
            })?;
            Self::from_json(&raw, default_speed_kmh)
        }
    }

    pub fn from_pbf(path: &Path, default_speed_kmh: f64) -> Result<Self, GraphError> {
        tracing::info!(path = %path.display(), "parsing OSM PBF");

        let mut builder = RoadGraphBuilder::new(default_speed_kmh);
        let mut temp_nodes = HashMap::new();

        // PASS 1: Nodes
        let reader = ElementReader::from_path(path)?;
        reader.for_each(|element| match element {
            Element::Node(node) => {
                temp_nodes.insert(node.id(), Coordinate::new(node.lat(), node.lon()));
            }
            Element::DenseNode(node) => {
                temp_nodes.insert(node.id(), Coordinate::new(node.lat(), node.lon()));
            }
            _ => {}
        })?;

        tracing::info!(nodes = temp_nodes.len(), "loaded OSM nodes, building edges");

        // PASS 2: Ways
        let mut skipped = 0usize;
        let reader_pass2 = ElementReader::from_path(path)?;
        reader_pass2.for_each(|element| {
            if let Element::Way(way) = element {
                let tags: HashMap<&str, &str> = way.tags().collect();
                let refs: Vec<i64> = way.refs().collect();
                skipped += add_way(&mut builder, &temp_nodes, &tags, &refs);
            }
        })?;

        if skipped > 0 {
            tracing::warn!(skipped, "way segments referenced missing or invalid nodes");
        }
        builder.build()
    }

    pub fn from_json(raw: &str, default_speed_kmh: f64) -> Result<Self, GraphError> {
        let doc: GraphDocument = serde_json::from_str(raw)?;
        let mut builder = RoadGraphBuilder::new(default_speed_kmh);

        for node in doc.nodes {
            builder.add_node(node.id.into_key(), Coordinate::new(node.lat, node.lng))?;
        }
        for edge in doc.edges {
            let from = builder.index_of(&edge.from.into_key())?;
            let to = builder.index_of(&edge.to.into_key())?;
            let distance_m = edge
                .distance_m
                .unwrap_or_else(|| builder.coord(from).haversine_m(&builder.coord(to)));
            let time_min = edge
                .time_min
                .unwrap_or_else(|| minutes_at(distance_m, default_speed_kmh));
            if edge.oneway {
                builder.add_edge(from, to, distance_m, time_min);
            } else {
                builder.add_road(from, to, distance_m, time_min);
            }
        }
        builder.build()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn coord(&self, node: NodeIndex) -> Coordinate {
        self.graph[node].coord
    }

    /// Nearest node to `coord` by great-circle distance, with that distance
    /// in meters; `None` only for an empty graph.
    ///
    /// The R-tree orders by planar degrees, which is not the haversine order
    /// away from the equator, so its nearest point only bounds the search:
    /// every node within that great-circle distance is then compared.
    pub fn nearest_node(&self, coord: Coordinate) -> Option<(NodeIndex, f64)> {
        let seed = self.nodes.nearest_neighbor(&[coord.lng, coord.lat])?;
        let bound = coord.haversine_m(&self.graph[seed.data].coord);

        coord
            .envelopes(bound)
            .into_iter()
            .flat_map(|(min, max)| self.nodes.locate_in_envelope(&AABB::from_corners(min, max)))
            .chain(std::iter::once(seed))
            .map(|p| (p.data, coord.haversine_m(&self.graph[p.data].coord)))
            .min_by(|(ia, da), (ib, db)| da.total_cmp(db).then(ia.cmp(ib)))
    }

    /// Outgoing edges of `node` in a stable order.
    pub fn neighbors(&self, node: NodeIndex) -> impl Iterator<Item = (EdgeIndex, NodeIndex, &RoadEdge)> {
        self.graph.edges(node).map(|e| (e.id(), e.target(), e.weight()))
    }

    pub fn edge(&self, edge: EdgeIndex) -> &RoadEdge {
        &self.graph[edge]
    }

    pub fn edge_midpoint(&self, edge: EdgeIndex) -> Option<Coordinate> {
        let (a, b) = self.graph.edge_endpoints(edge)?;
        Some(self.coord(a).midpoint(&self.coord(b)))
    }
}

/// Adds the segments of one OSM way; returns how many were skipped.
///
/// Ways without a routable `highway` class add nothing. `oneway=yes|1|true`
/// keeps the drawing direction, `oneway=-1|reverse` flips it, anything else
/// is two-way.
fn add_way(
    builder: &mut RoadGraphBuilder,
    nodes: &HashMap<i64, Coordinate>,
    tags: &HashMap<&str, &str>,
    refs: &[i64],
) -> usize {
    let Some(speed_kmh) = tags.get("highway").and_then(|h| highway_speed_kmh(h)) else {
        return 0;
    };
    let direction = match tags.get("oneway").copied() {
        Some("yes" | "1" | "true") => Direction::Forward,
        Some("-1" | "reverse") => Direction::Backward,
        _ => Direction::Both,
    };

    let mut skipped = 0;
    for window in refs.windows(2) {
        let (id_a, id_b) = (window[0], window[1]);
        let (Some(&a), Some(&b)) = (nodes.get(&id_a), nodes.get(&id_b)) else {
            skipped += 1;
            continue;
        };
        let (Ok(idx_a), Ok(idx_b)) = (
            builder.add_node(id_a.to_string(), a),
            builder.add_node(id_b.to_string(), b),
        ) else {
            skipped += 1;
            continue;
        };

        let distance_m = a.haversine_m(&b);
        let time_min = minutes_at(distance_m, speed_kmh);
        match direction {
            Direction::Forward => builder.add_edge(idx_a, idx_b, distance_m, time_min),
            Direction::Backward => builder.add_edge(idx_b, idx_a, distance_m, time_min),
            Direction::Both => builder.add_road(idx_a, idx_b, distance_m, time_min),
        }
    }
    skipped
}

enum Direction {
    Forward,
    Backward,
    Both,
}

/// Speeds for routable highway classes; `None` for ways that are not streets.
fn highway_speed_kmh(highway: &str) -> Option<f64> {
    let speed = match highway {
        "motorway" | "motorway_link" => 80.0,
        "trunk" | "trunk_link" => 60.0,
        "primary" | "primary_link" => 50.0,
        "secondary" | "secondary_link" => 45.0,
        "tertiary" | "tertiary_link" => 40.0,
        "unclassified" | "residential" => 30.0,
        "living_street" | "service" => 15.0,
        "pedestrian" | "footway" | "path" | "steps" => 5.0,
        _ => return None,
    };
    Some(speed)
}

fn minutes_at(distance_m: f64, speed_kmh: f64) -> f64 {
    distance_m / 1000.0 / speed_kmh * 60.0
}

#[derive(Deserialize)]
struct GraphDocument {
    nodes: Vec<NodeRecord>,
    edges: Vec<EdgeRecord>,
}

#[derive(Deserialize)]
struct NodeRecord {
    id: GraphId,
    lat: f64,
    lng: f64,
}

#[derive(Deserialize)]
struct EdgeRecord {
    from: GraphId,
    to: GraphId,
    distance_m: Option<f64>,
    time_min: Option<f64>,
    #[serde(default)]
    oneway: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GraphId {
    Int(i64),
    Str(String),
}

impl GraphId {
    fn into_key(self) -> String {
        match self {
            GraphId::Int(i) => i.to_string(),
            GraphId::Str(s) => s,
        }
    }
}

/// Accumulates nodes and directed edges, then indexes them.
pub struct RoadGraphBuilder {
    graph: Graph<RoadNode, RoadEdge>,
    keys: HashMap<String, NodeIndex>,
    default_speed_kmh: f64,
}

impl RoadGraphBuilder {
    pub fn new(default_speed_kmh: f64) -> Self {
        Self {
            graph: Graph::new(),
            keys: HashMap::new(),
            default_speed_kmh,
        }
    }

    /// Adds a node, or returns the existing one with the same key.
    pub fn add_node(&mut self, key: impl Into<String>, coord: Coordinate) -> Result<NodeIndex, GraphError> {
        let key = key.into();
        if let Some(&idx) = self.keys.get(&key) {
            return Ok(idx);
        }
        if !coord.is_valid() {
            return Err(GraphError::InvalidCoordinate {
                id: key,
                lat: coord.lat,
                lng: coord.lng,
            });
        }
        let idx = self.graph.add_node(RoadNode {
            key: key.clone(),
            coord,
        });
        self.keys.insert(key, idx);
        Ok(idx)
    }

    pub fn index_of(&self, key: &str) -> Result<NodeIndex, GraphError> {
        self.keys
            .get(key)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(key.to_string()))
    }

    pub fn coord(&self, node: NodeIndex) -> Coordinate {
        self.graph[node].coord
    }

    /// Directed edge `from -> to`.
    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex, distance_m: f64, time_min: f64) {
        self.graph.add_edge(from, to, RoadEdge { distance_m, time_min });
    }

    /// Two-way street with explicit costs.
    pub fn add_road(&mut self, a: NodeIndex, b: NodeIndex, distance_m: f64, time_min: f64) {
        self.add_edge(a, b, distance_m, time_min);
        self.add_edge(b, a, distance_m, time_min);
    }

    /// Two-way street with costs derived from its geometry.
    pub fn add_street(&mut self, a: NodeIndex, b: NodeIndex) {
        let distance_m = self.coord(a).haversine_m(&self.coord(b));
        let time_min = minutes_at(distance_m, self.default_speed_kmh);
        self.add_road(a, b, distance_m, time_min);
    }

    pub fn build(self) -> Result<NavigationGraph, GraphError> {
        if self.graph.node_count() == 0 {
            return Err(GraphError::Empty);
        }
        for edge in self.graph.edge_weights() {
            if !(edge.distance_m.is_finite() && edge.distance_m >= 0.0 && edge.time_min.is_finite() && edge.time_min >= 0.0) {
                return Err(GraphError::InvalidCost);
            }
        }

        let points = self
            .graph
            .node_indices()
            .map(|idx| {
                let c = self.graph[idx].coord;
                GeomWithData::new([c.lng, c.lat], idx)
            })
            .collect();
        let nodes = RTree::bulk_load(points);

        tracing::info!(
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "graph built"
        );
        Ok(NavigationGraph {
            graph: self.graph,
            nodes,
        })
    }
}
