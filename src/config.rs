use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

/// Upper bound for `SEARCH_TIMEOUT_MS`.
pub const MAX_SEARCH_TIMEOUT_MS: u64 = 60_000;

/// Tunable constants of the risk, checkpoint and scoring models.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingParams {
    /// Incidents farther than this from an edge midpoint contribute nothing.
    pub incident_radius_m: f64,
    /// Fraction of the severity kept at the edge of the incident radius.
    pub decay_floor: f64,
    pub recency_half_life_days: f64,
    /// Lower bound of `recency`; stale incidents never vanish.
    pub recency_floor: f64,
    /// Upper bound of `risk_weight / base_cost`.
    pub max_risk_multiplier: f64,
    /// Raw risk at which an edge reaches half of `max_risk_multiplier`.
    pub risk_saturation: f64,
    pub checkpoint_radius_m: f64,
    pub checkpoint_bonus: f64,
    /// Upper bound of `discount / base_cost`.
    pub max_discount_ratio: f64,
    /// Minimum blended edge weight.
    pub epsilon: f64,
    /// Incidents older than this are ignored entirely.
    pub incident_max_age_days: Option<f64>,
    /// Speed used when an edge has no explicit traversal time.
    pub default_speed_kmh: f64,
    /// Endpoints farther than this from every graph node are outside the mapped region.
    pub max_snap_distance_m: f64,
    pub high_risk_cell_threshold: f64,
}

impl Default for RoutingParams {
    fn default() -> Self {
        Self {
            incident_radius_m: 300.0,
            decay_floor: 0.1,
            recency_half_life_days: 30.0,
            recency_floor: 0.2,
            max_risk_multiplier: 2.0,
            risk_saturation: 5.0,
            checkpoint_radius_m: 500.0,
            checkpoint_bonus: 0.15,
            max_discount_ratio: 0.3,
            epsilon: 1e-3,
            incident_max_age_days: None,
            default_speed_kmh: 40.0,
            max_snap_distance_m: 5_000.0,
            high_risk_cell_threshold: 8.0,
        }
    }
}

impl RoutingParams {
    /// Defaults overridden by `ROUTE_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let d = Self::default();
        let params = Self {
            incident_radius_m: env_or("ROUTE_INCIDENT_RADIUS_M", d.incident_radius_m)?,
            decay_floor: env_or("ROUTE_DECAY_FLOOR", d.decay_floor)?,
            recency_half_life_days: env_or("ROUTE_RECENCY_HALF_LIFE_DAYS", d.recency_half_life_days)?,
            recency_floor: env_or("ROUTE_RECENCY_FLOOR", d.recency_floor)?,
            max_risk_multiplier: env_or("ROUTE_MAX_RISK_MULTIPLIER", d.max_risk_multiplier)?,
            risk_saturation: env_or("ROUTE_RISK_SATURATION", d.risk_saturation)?,
            checkpoint_radius_m: env_or("ROUTE_CHECKPOINT_RADIUS_M", d.checkpoint_radius_m)?,
            checkpoint_bonus: env_or("ROUTE_CHECKPOINT_BONUS", d.checkpoint_bonus)?,
            max_discount_ratio: env_or("ROUTE_MAX_DISCOUNT_RATIO", d.max_discount_ratio)?,
            epsilon: env_or("ROUTE_EPSILON", d.epsilon)?,
            incident_max_age_days: env_opt("INCIDENT_MAX_AGE_DAYS")?,
            default_speed_kmh: env_or("ROUTE_DEFAULT_SPEED_KMH", d.default_speed_kmh)?,
            max_snap_distance_m: env_or("ROUTE_MAX_SNAP_DISTANCE_M", d.max_snap_distance_m)?,
            high_risk_cell_threshold: env_or("ROUTE_HIGH_RISK_CELL_THRESHOLD", d.high_risk_cell_threshold)?,
        };
        params.check()?;
        Ok(params)
    }

    /// Rejects constant combinations that would break the search or the score bounds.
    pub fn check(&self) -> anyhow::Result<()> {
        let positive = [
            ("incident_radius_m", self.incident_radius_m),
            ("recency_half_life_days", self.recency_half_life_days),
            ("risk_saturation", self.risk_saturation),
            ("checkpoint_radius_m", self.checkpoint_radius_m),
            ("epsilon", self.epsilon),
            ("default_speed_kmh", self.default_speed_kmh),
            ("max_snap_distance_m", self.max_snap_distance_m),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                bail!("{name} must be positive, got {value}");
            }
        }
        if !(0.0..=1.0).contains(&self.decay_floor) {
            bail!("decay_floor must be within [0, 1]");
        }
        if !(self.recency_floor > 0.0 && self.recency_floor <= 1.0) {
            bail!("recency_floor must be within (0, 1]");
        }
        if !(self.max_risk_multiplier > 0.0) {
            bail!("max_risk_multiplier must be positive");
        }
        if !(0.0..1.0).contains(&self.max_discount_ratio) || self.checkpoint_bonus < 0.0 {
            bail!("checkpoint discount must stay below the base cost");
        }
        Ok(())
    }
}

/// Process configuration, read once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub port: u16,
    pub graph_path: PathBuf,
    pub checkpoints_path: Option<PathBuf>,
    pub incident_log_path: Option<PathBuf>,
    pub seed_sample_incidents: bool,
    pub search_timeout: Duration,
    pub params: RoutingParams,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        // A missing .env file is fine; the process environment is authoritative.
        let _ = dotenv::dotenv();

        let graph_path = env::var("GRAPH_PATH")
            .map(PathBuf::from)
            .context("GRAPH_PATH must point at an OSM PBF or JSON road graph")?;

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("PORT", 8001)?,
            graph_path,
            checkpoints_path: env::var("CHECKPOINTS_PATH").ok().map(PathBuf::from),
            incident_log_path: env::var("INCIDENT_LOG_PATH").ok().map(PathBuf::from),
            seed_sample_incidents: env_or("SEED_SAMPLE_INCIDENTS", true)?,
            search_timeout: search_timeout(env_or("SEARCH_TIMEOUT_MS", 2_000)?)?,
            params: RoutingParams::from_env()?,
        })
    }
}

fn search_timeout(ms: u64) -> anyhow::Result<Duration> {
    if !(1..=MAX_SEARCH_TIMEOUT_MS).contains(&ms) {
        bail!("SEARCH_TIMEOUT_MS must be within 1..={MAX_SEARCH_TIMEOUT_MS}, got {ms}");
    }
    Ok(Duration::from_millis(ms))
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(env_opt(key)?.unwrap_or(default))
}

fn env_opt<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}")),
        Err(_) => Ok(None),
    }
}
