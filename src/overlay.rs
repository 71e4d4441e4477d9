use petgraph::graph::EdgeIndex;

use crate::geo_index::GeoSnapshot;
use crate::graph::NavigationGraph;
use crate::safety::{EdgeAnnotation, SafetyModel};

/// Request-scoped risk/discount values, indexed by edge and filled on first use.
///
/// Only edges the searches relax or the scorer walks are ever annotated.
/// The shared graph is never written; each request owns its overlay and
/// drops it when the response is built.
pub struct EdgeOverlay<'a> {
    graph: &'a NavigationGraph,
    snapshot: &'a GeoSnapshot,
    model: SafetyModel<'a>,
    slots: Vec<Option<EdgeAnnotation>>,
}

impl<'a> EdgeOverlay<'a> {
    pub fn new(graph: &'a NavigationGraph, snapshot: &'a GeoSnapshot, model: SafetyModel<'a>) -> Self {
        Self {
            graph,
            snapshot,
            model,
            slots: vec![None; graph.edge_count()],
        }
    }

    pub fn model(&self) -> &SafetyModel<'a> {
        &self.model
    }

    pub fn annotation(&mut self, edge: EdgeIndex) -> &EdgeAnnotation {
        let Self {
            graph,
            snapshot,
            model,
            slots,
        } = self;

        slots[edge.index()].get_or_insert_with(|| match graph.edge_midpoint(edge) {
            Some(mid) => model.annotate(snapshot, mid, graph.edge(edge).distance_m),
            None => EdgeAnnotation::default(),
        })
    }

    /// Safety-pass weight of `edge`.
    pub fn blended_cost(&mut self, edge: EdgeIndex) -> f64 {
        let base = self.graph.edge(edge).distance_m;
        let annotation = self.annotation(edge).clone();
        self.model.blended_cost(base, &annotation)
    }

    /// Number of edges annotated so far.
    pub fn annotated(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::RoutingParams;
    use crate::geo_index::GeoIndex;
    use crate::graph::RoadGraphBuilder;
    use crate::model::{Coordinate, Incident, IncidentType, Severity};

    #[test]
    fn edges_are_annotated_lazily_wherever_they_lie() {
        let mut b = RoadGraphBuilder::new(40.0);
        let near_a = b.add_node("na", Coordinate::new(19.0760, 72.8777)).unwrap();
        let near_b = b.add_node("nb", Coordinate::new(19.0770, 72.8777)).unwrap();
        let far_a = b.add_node("fa", Coordinate::new(19.5000, 72.8777)).unwrap();
        let far_b = b.add_node("fb", Coordinate::new(19.5010, 72.8777)).unwrap();
        let quiet_a = b.add_node("qa", Coordinate::new(19.3000, 72.8777)).unwrap();
        let quiet_b = b.add_node("qb", Coordinate::new(19.3010, 72.8777)).unwrap();
        b.add_edge(near_a, near_b, 111.0, 1.0);
        b.add_edge(far_a, far_b, 111.0, 1.0);
        b.add_edge(quiet_a, quiet_b, 111.0, 1.0);
        let graph = b.build().unwrap();

        let now = Utc::now();
        let report = |lat| {
            Incident::new(
                Coordinate::new(lat, 72.8777),
                IncidentType::Harassment,
                Severity::try_from(5).unwrap(),
                None,
                now,
            )
        };
        let index = GeoIndex::new(vec![], vec![report(19.0765), report(19.5005)]);
        let snapshot = index.snapshot();
        let params = RoutingParams::default();
        let mut overlay = EdgeOverlay::new(&graph, &snapshot, SafetyModel::new(&params, now));
        assert_eq!(overlay.annotated(), 0);

        let (near_edge, _, _) = graph.neighbors(near_a).next().unwrap();
        let (far_edge, _, _) = graph.neighbors(far_a).next().unwrap();
        let (quiet_edge, _, _) = graph.neighbors(quiet_a).next().unwrap();
        assert!(overlay.annotation(near_edge).risk_weight > 0.0);
        assert!(overlay.annotation(far_edge).risk_weight > 0.0);
        assert_eq!(overlay.annotation(far_edge).incidents.len(), 1);
        assert!(overlay.blended_cost(near_edge) > 111.0);
        assert_eq!(overlay.annotated(), 2);

        assert_eq!(overlay.blended_cost(quiet_edge), 111.0);
        assert_eq!(overlay.annotated(), 3);
    }
}
