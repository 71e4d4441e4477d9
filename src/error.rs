use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures while loading or building the road graph.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to read graph file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse OSM PBF: {0}")]
    Pbf(#[from] osmpbf::Error),

    #[error("failed to parse graph document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("edge references unknown node {0}")]
    UnknownNode(String),

    #[error("node {id} has out-of-range coordinate ({lat}, {lng})")]
    InvalidCoordinate { id: String, lat: f64, lng: f64 },

    #[error("edge cost must be finite and non-negative")]
    InvalidCost,

    #[error("graph contains no routable nodes")]
    Empty,
}

/// Failures of the append-only incident log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("incident log unavailable: {0}")]
    Io(#[from] std::io::Error),

    #[error("incident log entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("incident log line {line} is corrupt: {message}")]
    Corrupt { line: usize, message: String },
}

/// Per-request failures of the route service.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("no route found: {0}")]
    NoRoute(String),

    #[error("routing data unavailable: {0}")]
    DataUnavailable(String),

    #[error("route search exceeded its deadline")]
    Timeout,

    #[error("internal routing error: {0}")]
    Internal(String),
}

impl RouteError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        RouteError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error surface of the HTTP API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Route(RouteError::Validation { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error")
            }
            ApiError::Route(RouteError::NoRoute(_)) => (StatusCode::NOT_FOUND, "no_route"),
            ApiError::Route(RouteError::DataUnavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "data_unavailable")
            }
            ApiError::Route(RouteError::Timeout) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            ApiError::Route(RouteError::Internal(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            ApiError::Store(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        if status.is_server_error() {
            tracing::error!(error = %self, kind, "request failed");
        } else {
            tracing::debug!(error = %self, kind, "request rejected");
        }

        let field = match &self {
            ApiError::Route(RouteError::Validation { field, .. }) => Some(field.clone()),
            _ => None,
        };
        let body = json!({
            "error": kind,
            "message": self.to_string(),
            "field": field,
        });
        (status, Json(body)).into_response()
    }
}
