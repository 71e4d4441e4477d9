use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use petgraph::graph::NodeIndex;

use crate::config::RoutingParams;
use crate::error::RouteError;
use crate::geo_index::GeoIndex;
use crate::graph::NavigationGraph;
use crate::model::{Coordinate, RouteResult};
use crate::overlay::EdgeOverlay;
use crate::safety::SafetyModel;
use crate::score::score_path;
use crate::search::{Path, dual_path};

/// Stateless route computation over the shared graph and geo index.
#[derive(Clone)]
pub struct RouteEngine {
    graph: Arc<NavigationGraph>,
    geo: Arc<GeoIndex>,
    params: Arc<RoutingParams>,
    timeout: Duration,
}

impl RouteEngine {
    pub fn new(graph: Arc<NavigationGraph>, geo: Arc<GeoIndex>, params: RoutingParams, timeout: Duration) -> Self {
        Self {
            graph,
            geo,
            params: Arc::new(params),
            timeout,
        }
    }

    pub fn params(&self) -> &RoutingParams {
        &self.params
    }

    pub fn geo(&self) -> &GeoIndex {
        &self.geo
    }

    fn snap(&self, coord: Coordinate, which: &str) -> Result<NodeIndex, RouteError> {
        if self.graph.node_count() == 0 {
            return Err(RouteError::DataUnavailable("road graph is empty".into()));
        }
        match self.graph.nearest_node(coord) {
            Some((node, distance)) if distance <= self.params.max_snap_distance_m => Ok(node),
            Some((_, distance)) => Err(RouteError::NoRoute(format!(
                "{which} point is {distance:.0} m from the nearest mapped road"
            ))),
            None => Err(RouteError::NoRoute(format!("{which} point cannot be snapped to the road graph"))),
        }
    }

    /// Computes the shortest and safest routes between two validated points.
    ///
    /// `as_of` is the instant incident ages are measured from; identical
    /// inputs and data with the same `as_of` give identical results.
    pub fn calculate(&self, start: Coordinate, end: Coordinate, as_of: DateTime<Utc>) -> Result<RouteResult, RouteError> {
        let from = self.snap(start, "start")?;
        let to = self.snap(end, "end")?;

        let snapshot = self.geo.snapshot();
        let span = tracing::debug_span!(
            "calculate_route",
            incident_version = snapshot.version(),
            from = from.index(),
            to = to.index()
        );
        let _enter = span.enter();

        let model = SafetyModel::new(&self.params, as_of);
        let mut overlay = EdgeOverlay::new(&self.graph, &snapshot, model);

        let deadline = Instant::now()
            .checked_add(self.timeout)
            .ok_or_else(|| RouteError::Internal(format!("search timeout {:?} is out of range", self.timeout)))?;
        let paths = dual_path(&self.graph, &mut overlay, from, to, deadline)?;

        let shortest_score = score_path(&self.graph, &mut overlay, &paths.shortest)?;
        let blended_score = score_path(&self.graph, &mut overlay, &paths.safest)?;

        // The blended search optimises a cost, not the score ratio; never
        // report a "safest" route that scores below the shortest one.
        let (safest, score) = if shortest_score.safety_score > blended_score.safety_score {
            tracing::debug!(
                shortest = shortest_score.safety_score,
                blended = blended_score.safety_score,
                "shortest route scores higher, returning it as safest"
            );
            (&paths.shortest, shortest_score)
        } else {
            (&paths.safest, blended_score)
        };

        tracing::debug!(
            annotated_edges = overlay.annotated(),
            shortest_cost = paths.shortest.cost,
            blended_cost = paths.safest.cost,
            risk = score.risk,
            safety_score = score.safety_score,
            "route computed"
        );

        let result = RouteResult {
            safest_route: self.coordinates(safest),
            shortest_route: self.coordinates(&paths.shortest),
            safety_score: score.safety_score,
            distance_km: round_to(score.distance_m / 1000.0, 2),
            estimated_time_min: round_to(score.time_min, 1),
            toll_count: score.toll_count,
            incident_count: score.incident_count,
        };
        check_result(&result)?;
        Ok(result)
    }

    fn coordinates(&self, path: &Path) -> Vec<Coordinate> {
        path.nodes.iter().map(|&n| self.graph.coord(n)).collect()
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

/// Refuses results that violate the response contract instead of returning them.
fn check_result(result: &RouteResult) -> Result<(), RouteError> {
    if result.safest_route.is_empty() || result.shortest_route.is_empty() {
        return Err(RouteError::Internal("search produced an empty route".into()));
    }
    if result.safety_score > 100 {
        return Err(RouteError::Internal(format!("score {} out of range", result.safety_score)));
    }
    let numbers = [result.distance_km, result.estimated_time_min];
    if numbers.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(RouteError::Internal("route totals must be finite and non-negative".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RoadGraphBuilder;
    use crate::model::{Checkpoint, Incident, IncidentType, Severity};

    /// Ladder of two parallel north-south streets joined at both ends:
    ///
    /// ```text
    /// west: w0 ─ w1 ─ ... ─ w8      (lng 72.8760)
    ///        │                │
    /// east: e0 ─ e1 ─ ... ─ e8      (lng 72.8790)
    /// ```
    /// Endpoints sit on the west street, which is also the shortest path.
    fn ladder() -> NavigationGraph {
        let mut b = RoadGraphBuilder::new(40.0);
        let west: Vec<_> = (0..9)
            .map(|i| {
                b.add_node(format!("w{i}"), Coordinate::new(19.0760 + f64::from(i) * 0.001, 72.8760))
                    .unwrap()
            })
            .collect();
        let east: Vec<_> = (0..9)
            .map(|i| {
                b.add_node(format!("e{i}"), Coordinate::new(19.0760 + f64::from(i) * 0.001, 72.8790))
                    .unwrap()
            })
            .collect();
        for pair in west.windows(2) {
            b.add_street(pair[0], pair[1]);
        }
        for pair in east.windows(2) {
            b.add_street(pair[0], pair[1]);
        }
        b.add_street(west[0], east[0]);
        b.add_street(west[8], east[8]);
        b.build().unwrap()
    }

    fn engine(graph: NavigationGraph, incidents: Vec<Incident>, checkpoints: Vec<Checkpoint>) -> RouteEngine {
        RouteEngine::new(
            Arc::new(graph),
            Arc::new(GeoIndex::new(checkpoints, incidents)),
            RoutingParams::default(),
            Duration::from_secs(5),
        )
    }

    fn report(lat: f64, lng: f64, severity: i64, as_of: DateTime<Utc>) -> Incident {
        Incident::new(
            Coordinate::new(lat, lng),
            IncidentType::Assault,
            Severity::try_from(severity).unwrap(),
            None,
            as_of,
        )
    }

    const START: Coordinate = Coordinate::new(19.0760, 72.8760);
    const END: Coordinate = Coordinate::new(19.0840, 72.8760);

    #[test]
    fn no_incidents_means_identical_routes_and_full_score() {
        let e = engine(ladder(), vec![], vec![]);
        let r = e.calculate(START, END, Utc::now()).unwrap();
        assert_eq!(r.safest_route, r.shortest_route);
        assert_eq!(r.safety_score, 100);
        assert_eq!(r.safest_route.len(), 9);
        assert!(r.distance_km > 0.8 && r.distance_km < 1.0);
    }

    #[test]
    fn safest_route_detours_around_incidents() {
        let now = Utc::now();
        let incidents = (2..7)
            .map(|i| report(19.0760 + f64::from(i) * 0.001, 72.8760, 5, now))
            .collect();
        let e = engine(ladder(), incidents, vec![]);
        let r = e.calculate(START, END, now).unwrap();

        assert!(r.safest_route.iter().any(|c| c.lng == 72.8790), "expected a detour east");
        assert!(r.shortest_route.iter().all(|c| c.lng == 72.8760));
        assert!(r.safety_score > 0);
    }

    #[test]
    fn safest_never_scores_below_shortest() {
        let now = Utc::now();
        let incidents = vec![report(19.0800, 72.8760, 3, now), report(19.0790, 72.8790, 2, now)];
        let e = engine(ladder(), incidents, vec![]);
        let r = e.calculate(START, END, now).unwrap();

        // Score the shortest route on its own by making it the only option.
        let mut b = RoadGraphBuilder::new(40.0);
        let nodes: Vec<_> = r
            .shortest_route
            .iter()
            .enumerate()
            .map(|(i, c)| b.add_node(i.to_string(), *c).unwrap())
            .collect();
        for pair in nodes.windows(2) {
            b.add_street(pair[0], pair[1]);
        }
        let only_shortest = engine(
            b.build().unwrap(),
            vec![report(19.0800, 72.8760, 3, now), report(19.0790, 72.8790, 2, now)],
            vec![],
        );
        let shortest_alone = only_shortest.calculate(START, END, now).unwrap();
        assert!(r.safety_score >= shortest_alone.safety_score);
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let now = Utc::now();
        let incidents = vec![report(19.0800, 72.8760, 4, now), report(19.0810, 72.8790, 2, now)];
        let gates = vec![Checkpoint {
            id: "g".into(),
            lat: 19.0800,
            lng: 72.8790,
            name: "Gate".into(),
            monitored: true,
        }];
        let e = engine(ladder(), incidents, gates);
        let first = e.calculate(START, END, now).unwrap();
        for _ in 0..5 {
            assert_eq!(e.calculate(START, END, now).unwrap(), first);
        }
    }

    #[test]
    fn new_incident_on_route_never_raises_score() {
        let now = Utc::now();
        let e = engine(ladder(), vec![report(19.0790, 72.8760, 2, now)], vec![]);
        let before = e.calculate(START, END, now).unwrap();

        let mid = before.safest_route[before.safest_route.len() / 2];
        e.geo().insert_incident(report(mid.lat, mid.lng, 5, now));
        let after = e.calculate(START, END, now).unwrap();
        assert!(after.safety_score <= before.safety_score);
    }

    #[test]
    fn same_start_and_end_is_a_single_point() {
        let e = engine(ladder(), vec![report(19.0760, 72.8760, 5, Utc::now())], vec![]);
        let r = e.calculate(START, START, Utc::now()).unwrap();
        assert_eq!(r.safest_route.len(), 1);
        assert_eq!(r.shortest_route.len(), 1);
        assert_eq!(r.distance_km, 0.0);
        assert_eq!(r.incident_count, 0);
        assert!(r.safety_score <= 100);
    }

    #[test]
    fn far_away_endpoint_is_no_route() {
        let e = engine(ladder(), vec![], vec![]);
        let err = e.calculate(START, Coordinate::new(28.6139, 77.2090), Utc::now()).unwrap_err();
        assert!(matches!(err, RouteError::NoRoute(_)));
    }

    #[test]
    fn disconnected_components_are_no_route() {
        let mut b = RoadGraphBuilder::new(40.0);
        let a = b.add_node("a", Coordinate::new(19.0760, 72.8777)).unwrap();
        let a2 = b.add_node("a2", Coordinate::new(19.0770, 72.8777)).unwrap();
        let c = b.add_node("c", Coordinate::new(19.0900, 72.8777)).unwrap();
        let c2 = b.add_node("c2", Coordinate::new(19.0910, 72.8777)).unwrap();
        b.add_street(a, a2);
        b.add_street(c, c2);
        let e = engine(b.build().unwrap(), vec![], vec![]);

        let err = e
            .calculate(Coordinate::new(19.0760, 72.8777), Coordinate::new(19.0910, 72.8777), Utc::now())
            .unwrap_err();
        assert!(matches!(err, RouteError::NoRoute(_)));
    }

    #[test]
    fn incidents_far_from_both_endpoints_still_count() {
        // One street looping ~11 km north and back; the endpoints are 1 km apart.
        let mut b = RoadGraphBuilder::new(40.0);
        let mut coords: Vec<Coordinate> = (0..=100).map(|i| Coordinate::new(19.0 + f64::from(i) * 0.001, 72.80)).collect();
        coords.extend((1..=10).map(|i| Coordinate::new(19.1, 72.80 + f64::from(i) * 0.001)));
        coords.extend((0..100).rev().map(|i| Coordinate::new(19.0 + f64::from(i) * 0.001, 72.81)));
        let nodes: Vec<_> = coords
            .iter()
            .enumerate()
            .map(|(i, c)| b.add_node(i.to_string(), *c).unwrap())
            .collect();
        for pair in nodes.windows(2) {
            b.add_street(pair[0], pair[1]);
        }

        let now = Utc::now();
        let e = engine(b.build().unwrap(), vec![report(19.1, 72.805, 5, now)], vec![]);
        let r = e
            .calculate(Coordinate::new(19.0, 72.80), Coordinate::new(19.0, 72.81), now)
            .unwrap();

        assert_eq!(r.safest_route.len(), coords.len());
        assert_eq!(r.incident_count, 1);
        assert!(r.safety_score < 100);
    }

    #[test]
    fn oversized_timeout_fails_instead_of_panicking() {
        let e = RouteEngine::new(
            Arc::new(ladder()),
            Arc::new(GeoIndex::new(vec![], vec![])),
            RoutingParams::default(),
            Duration::MAX,
        );
        let err = e.calculate(START, END, Utc::now()).unwrap_err();
        assert!(matches!(err, RouteError::Internal(_)));
    }
}
