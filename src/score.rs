use std::collections::BTreeSet;

use crate::error::RouteError;
use crate::graph::NavigationGraph;
use crate::overlay::EdgeOverlay;
use crate::search::Path;

/// Summary of one route under the request's overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteScore {
    pub safety_score: u8,
    pub distance_m: f64,
    pub time_min: f64,
    pub risk: f64,
    pub incident_count: usize,
    pub toll_count: usize,
}

/// Reduces a path's per-edge annotations into a 0..=100 score and counters.
///
/// The risk sum is normalised by `max_risk_multiplier * distance`, the
/// largest risk the path could carry, so long routes are not penalised just
/// for having more edges. Any positive risk costs at least one point, so a
/// route with incidents near it never reports a clean 100.
pub fn score_path(graph: &NavigationGraph, overlay: &mut EdgeOverlay<'_>, path: &Path) -> Result<RouteScore, RouteError> {
    let mut distance_m = 0.0;
    let mut time_min = 0.0;
    let mut risk = 0.0;
    let mut incidents = BTreeSet::new();
    let mut checkpoints = BTreeSet::new();

    for &edge in &path.edges {
        let base = graph.edge(edge);
        distance_m += base.distance_m;
        time_min += base.time_min;

        let annotation = overlay.annotation(edge);
        risk += annotation.risk_weight;
        incidents.extend(annotation.incidents.iter().copied());
        checkpoints.extend(annotation.checkpoints.iter().copied());
    }

    let reference = overlay.model().params().max_risk_multiplier * distance_m;
    let normalized = if reference > 0.0 { risk / reference } else { 0.0 };
    if !(normalized.is_finite() && distance_m.is_finite() && time_min.is_finite()) {
        return Err(RouteError::Internal(format!(
            "route aggregation produced non-finite values (risk {risk}, distance {distance_m})"
        )));
    }

    let mut safety_score = (100.0 * (1.0 - normalized)).round().clamp(0.0, 100.0);
    if risk > 0.0 {
        safety_score = safety_score.min(99.0);
    }
    Ok(RouteScore {
        safety_score: safety_score as u8,
        distance_m,
        time_min,
        risk,
        incident_count: incidents.len(),
        toll_count: checkpoints.len(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::Utc;

    use super::*;
    use crate::config::RoutingParams;
    use crate::geo_index::GeoIndex;
    use crate::graph::RoadGraphBuilder;
    use crate::model::{Checkpoint, Coordinate, Incident, IncidentType, Severity};
    use crate::safety::SafetyModel;
    use crate::search::shortest_path;

    fn straight_line() -> NavigationGraph {
        let mut b = RoadGraphBuilder::new(40.0);
        let mut prev = b.add_node("0", Coordinate::new(19.0760, 72.8777)).unwrap();
        for i in 1..=5 {
            let next = b
                .add_node(i.to_string(), Coordinate::new(19.0760 + f64::from(i) * 0.001, 72.8777))
                .unwrap();
            b.add_street(prev, next);
            prev = next;
        }
        b.build().unwrap()
    }

    fn score_with(incidents: Vec<Incident>, checkpoints: Vec<Checkpoint>) -> RouteScore {
        let graph = straight_line();
        let index = GeoIndex::new(checkpoints, incidents);
        let snapshot = index.snapshot();
        let params = RoutingParams::default();
        let now = Utc::now();
        let (from, _) = graph.nearest_node(Coordinate::new(19.0760, 72.8777)).unwrap();
        let (to, _) = graph.nearest_node(Coordinate::new(19.0810, 72.8777)).unwrap();
        let mut overlay = EdgeOverlay::new(&graph, &snapshot, SafetyModel::new(&params, now));
        let path = shortest_path(&graph, from, to, Instant::now() + Duration::from_secs(10), |_, e| e.distance_m).unwrap();
        score_path(&graph, &mut overlay, &path).unwrap()
    }

    fn report(lat: f64, severity: i64) -> Incident {
        Incident::new(
            Coordinate::new(lat, 72.8777),
            IncidentType::Assault,
            Severity::try_from(severity).unwrap(),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn clean_route_scores_100() {
        let s = score_with(vec![], vec![]);
        assert_eq!(s.safety_score, 100);
        assert_eq!(s.incident_count, 0);
        assert_eq!(s.toll_count, 0);
        assert!((s.distance_m - 556.0).abs() < 5.0, "got {}", s.distance_m);
    }

    #[test]
    fn incidents_lower_the_score_and_are_counted_once() {
        let s = score_with(vec![report(19.0785, 5)], vec![]);
        assert!(s.safety_score < 100);
        assert_eq!(s.incident_count, 1);
    }

    #[test]
    fn score_monotone_in_added_incidents() {
        let one = score_with(vec![report(19.0785, 5)], vec![]);
        let two = score_with(vec![report(19.0785, 5), report(19.0795, 4)], vec![]);
        assert!(two.safety_score <= one.safety_score);
    }

    #[test]
    fn checkpoints_are_counted_distinctly() {
        let gate = Checkpoint {
            id: "g1".into(),
            lat: 19.0780,
            lng: 72.8778,
            name: "Gate".into(),
            monitored: true,
        };
        let s = score_with(vec![], vec![gate]);
        assert_eq!(s.toll_count, 1);
        assert_eq!(s.safety_score, 100);
    }

    #[test]
    fn trivial_path_scores_full() {
        let graph = straight_line();
        let index = GeoIndex::new(vec![], vec![report(19.0760, 5)]);
        let snapshot = index.snapshot();
        let params = RoutingParams::default();
        let (node, _) = graph.nearest_node(Coordinate::new(19.0760, 72.8777)).unwrap();
        let mut overlay = EdgeOverlay::new(&graph, &snapshot, SafetyModel::new(&params, Utc::now()));
        let path = Path {
            nodes: vec![node],
            edges: vec![],
            cost: 0.0,
        };
        let s = score_path(&graph, &mut overlay, &path).unwrap();
        assert_eq!(s.safety_score, 100);
        assert_eq!(s.distance_m, 0.0);
        assert_eq!(s.incident_count, 0);
    }

    #[test]
    fn single_incident_on_long_route_still_costs_a_point() {
        // ~200 km street; one incident touches only a handful of edges.
        let mut b = RoadGraphBuilder::new(40.0);
        let nodes: Vec<_> = (0..=400)
            .map(|i| {
                b.add_node(i.to_string(), Coordinate::new(19.0 + f64::from(i) * 0.0045, 72.8777))
                    .unwrap()
            })
            .collect();
        for pair in nodes.windows(2) {
            b.add_street(pair[0], pair[1]);
        }
        let graph = b.build().unwrap();

        let middle = graph.coord(nodes[200]);
        let index = GeoIndex::new(vec![], vec![report(middle.lat, 5)]);
        let snapshot = index.snapshot();
        let params = RoutingParams::default();
        let mut overlay = EdgeOverlay::new(&graph, &snapshot, SafetyModel::new(&params, Utc::now()));
        let deadline = Instant::now() + Duration::from_secs(10);
        let path = shortest_path(&graph, nodes[0], nodes[400], deadline, |_, e| e.distance_m).unwrap();

        let s = score_path(&graph, &mut overlay, &path).unwrap();
        assert!(s.distance_m > 190_000.0);
        assert_eq!(s.incident_count, 1);
        assert!(s.risk > 0.0);
        assert_eq!(s.safety_score, 99);
    }
}
