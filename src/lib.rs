//! Safety-aware route service.
//!
//! Given two points, snaps them onto a road graph and runs two searches over
//! the same topology: one by distance, one by a blended cost that penalises
//! edges near reported incidents and rewards edges near monitored
//! checkpoints. The safer route is summarised as a 0-100 safety score.
//!
//! | Module        | Contents                                              |
//! |---------------|-------------------------------------------------------|
//! | [`graph`]     | `NavigationGraph`, OSM/JSON loaders, node snapping    |
//! | [`geo_index`] | Snapshot-published R-tree over incidents/checkpoints |
//! | [`safety`]    | Risk and checkpoint models, H3 risk clustering        |
//! | [`overlay`]   | Request-scoped per-edge annotations                   |
//! | [`search`]    | Dijkstra and the dual shortest/safest pass            |
//! | [`score`]     | Route scoring and counters                            |
//! | [`engine`]    | `RouteEngine` orchestration                           |
//! | [`api`]       | axum handlers                                         |

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo_index;
pub mod graph;
pub mod model;
pub mod overlay;
pub mod safety;
pub mod score;
pub mod search;
pub mod seed;
pub mod store;

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::routing::{get, post};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{Config, RoutingParams};
use crate::engine::RouteEngine;
use crate::geo_index::GeoIndex;
use crate::graph::NavigationGraph;
use crate::model::Checkpoint;
use crate::store::{IncidentStore, JsonLinesStore, MemoryStore};

// Shared State for concurrency
pub struct AppState {
    pub engine: RouteEngine,
    pub store: Arc<dyn IncidentStore>,
    pub routes_calculated: AtomicU64,
}

impl AppState {
    pub fn new(
        graph: NavigationGraph,
        checkpoints: Vec<Checkpoint>,
        store: Arc<dyn IncidentStore>,
        params: RoutingParams,
        search_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let incidents = store.load().context("replaying incident log")?;
        let geo = GeoIndex::new(checkpoints, incidents);
        Ok(Self {
            engine: RouteEngine::new(Arc::new(graph), Arc::new(geo), params, search_timeout),
            store,
            routes_calculated: AtomicU64::new(0),
        })
    }

    /// Loads every data source named by `config`. Fails if the graph is unavailable.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let graph = NavigationGraph::load(&config.graph_path, config.params.default_speed_kmh)
            .with_context(|| format!("road graph unavailable at {}", config.graph_path.display()))?;

        let checkpoints = match &config.checkpoints_path {
            Some(path) => seed::load_checkpoints(path)?,
            None => {
                tracing::info!("no CHECKPOINTS_PATH configured, using sample toll gates");
                seed::sample_checkpoints()
            }
        };

        let store: Arc<dyn IncidentStore> = match &config.incident_log_path {
            Some(path) => Arc::new(JsonLinesStore::open(path).context("opening incident log")?),
            None => {
                tracing::warn!("no INCIDENT_LOG_PATH configured, reports will not survive a restart");
                Arc::new(MemoryStore)
            }
        };

        let state = Self::new(graph, checkpoints, store, config.params.clone(), config.search_timeout)?;

        if config.seed_sample_incidents && state.engine.geo().snapshot().incident_count() == 0 {
            let samples = seed::sample_incidents(Utc::now());
            tracing::info!(count = samples.len(), "seeding sample incidents");
            for incident in samples {
                state
                    .engine
                    .geo()
                    .insert_incident_with(incident, |i| state.store.append(i))
                    .context("seeding sample incidents")?;
            }
        }
        Ok(state)
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    // The rendering client is served from a different origin.
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api", get(api::root))
        .route("/api/", get(api::root))
        .route("/api/incidents", get(api::list_incidents).post(api::create_incident))
        .route("/api/tollgates", get(api::list_tollgates))
        .route("/api/emergency-contacts", get(api::emergency_contacts))
        .route("/api/routes/calculate", post(api::calculate_route))
        .route("/api/stats", get(api::stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
