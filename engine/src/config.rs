use std::str::FromStr;
use std::time::Duration;

use waypoint_shared::tile::DEFAULT_TILE_SIZE_DEG;

pub const DEFAULT_STABILITY_THRESHOLD_DEG: f64 = 0.01;
pub const DEFAULT_IDLE_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 400;

pub const DEFAULT_MIN_FETCH_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;
pub const DEFAULT_MAX_FETCHES_PER_WINDOW: usize = 10;
pub const DEFAULT_BREAKER_COOLDOWN_SECS: u64 = 30;
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_DUPLICATE_WINDOW_SECS: u64 = 60;

pub const DEFAULT_TILE_TTL_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_REVALIDATE_AFTER_SECS: u64 = 120;
pub const DEFAULT_MAX_CACHED_TILES: usize = 256;
pub const DEFAULT_MAX_PREFETCH_TILES: usize = 2;
pub const DEFAULT_MAX_TILES_PER_QUERY: usize = 400;

pub const DEFAULT_RESULT_LIMIT: usize = 200;
pub const DEFAULT_QUERY_BUFFER_KM: f64 = 1.0;

pub const DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_NOTICE_BUFFER: usize = 16;

/// Reads a strictly positive value from the environment.
fn env_positive<T>(key: &str) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_positive(key).unwrap_or(default_ms))
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_positive(key).unwrap_or(default_secs))
}

#[derive(Debug, Clone, PartialEq)]
pub struct StabilizerConfig {
    pub threshold_deg: f64,
    pub idle_debounce: Duration,
    pub settle_delay: Duration,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            threshold_deg: DEFAULT_STABILITY_THRESHOLD_DEG,
            idle_debounce: Duration::from_millis(DEFAULT_IDLE_DEBOUNCE_MS),
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        }
    }
}

impl StabilizerConfig {
    pub fn from_env() -> Self {
        Self {
            threshold_deg: env_positive("WAYPOINT_STABILITY_THRESHOLD_DEG")
                .unwrap_or(DEFAULT_STABILITY_THRESHOLD_DEG),
            idle_debounce: env_millis("WAYPOINT_IDLE_DEBOUNCE_MS", DEFAULT_IDLE_DEBOUNCE_MS),
            settle_delay: env_millis("WAYPOINT_SETTLE_DELAY_MS", DEFAULT_SETTLE_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GovernorConfig {
    pub min_interval: Duration,
    pub window: Duration,
    pub max_per_window: usize,
    pub cooldown: Duration,
    pub failure_threshold: u32,
    pub duplicate_window: Duration,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(DEFAULT_MIN_FETCH_INTERVAL_MS),
            window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            max_per_window: DEFAULT_MAX_FETCHES_PER_WINDOW,
            cooldown: Duration::from_secs(DEFAULT_BREAKER_COOLDOWN_SECS),
            failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            duplicate_window: Duration::from_secs(DEFAULT_DUPLICATE_WINDOW_SECS),
        }
    }
}

impl GovernorConfig {
    pub fn from_env() -> Self {
        Self {
            min_interval: env_millis(
                "WAYPOINT_MIN_FETCH_INTERVAL_MS",
                DEFAULT_MIN_FETCH_INTERVAL_MS,
            ),
            window: env_secs("WAYPOINT_RATE_WINDOW_SECS", DEFAULT_RATE_WINDOW_SECS),
            max_per_window: env_positive("WAYPOINT_MAX_FETCHES_PER_WINDOW")
                .unwrap_or(DEFAULT_MAX_FETCHES_PER_WINDOW),
            cooldown: env_secs(
                "WAYPOINT_BREAKER_COOLDOWN_SECS",
                DEFAULT_BREAKER_COOLDOWN_SECS,
            ),
            failure_threshold: env_positive("WAYPOINT_BREAKER_FAILURE_THRESHOLD")
                .unwrap_or(DEFAULT_BREAKER_FAILURE_THRESHOLD),
            duplicate_window: env_secs(
                "WAYPOINT_DUPLICATE_WINDOW_SECS",
                DEFAULT_DUPLICATE_WINDOW_SECS,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TileCacheConfig {
    pub tile_size_deg: f64,
    pub ttl: Duration,
    pub revalidate_after: Duration,
    pub max_tiles: usize,
    pub max_prefetch: usize,
    pub max_tiles_per_query: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            tile_size_deg: DEFAULT_TILE_SIZE_DEG,
            ttl: Duration::from_secs(DEFAULT_TILE_TTL_SECS),
            revalidate_after: Duration::from_secs(DEFAULT_REVALIDATE_AFTER_SECS),
            max_tiles: DEFAULT_MAX_CACHED_TILES,
            max_prefetch: DEFAULT_MAX_PREFETCH_TILES,
            max_tiles_per_query: DEFAULT_MAX_TILES_PER_QUERY,
        }
    }
}

impl TileCacheConfig {
    pub fn from_env() -> Self {
        Self {
            tile_size_deg: env_positive("WAYPOINT_TILE_SIZE_DEG").unwrap_or(DEFAULT_TILE_SIZE_DEG),
            ttl: env_secs("WAYPOINT_TILE_TTL_SECS", DEFAULT_TILE_TTL_SECS),
            revalidate_after: env_secs(
                "WAYPOINT_REVALIDATE_AFTER_SECS",
                DEFAULT_REVALIDATE_AFTER_SECS,
            ),
            max_tiles: env_positive("WAYPOINT_MAX_CACHED_TILES")
                .unwrap_or(DEFAULT_MAX_CACHED_TILES),
            max_prefetch: env_positive("WAYPOINT_MAX_PREFETCH_TILES")
                .unwrap_or(DEFAULT_MAX_PREFETCH_TILES),
            max_tiles_per_query: env_positive("WAYPOINT_MAX_TILES_PER_QUERY")
                .unwrap_or(DEFAULT_MAX_TILES_PER_QUERY),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub result_limit: usize,
    pub query_buffer_km: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            result_limit: DEFAULT_RESULT_LIMIT,
            query_buffer_km: DEFAULT_QUERY_BUFFER_KM,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        Self {
            result_limit: env_positive("WAYPOINT_RESULT_LIMIT").unwrap_or(DEFAULT_RESULT_LIMIT),
            query_buffer_km: env_positive("WAYPOINT_QUERY_BUFFER_KM")
                .unwrap_or(DEFAULT_QUERY_BUFFER_KM),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpBackendConfig {
    pub endpoint: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            request_timeout: Duration::from_secs(DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS),
        }
    }
}

impl HttpBackendConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("WAYPOINT_POI_ENDPOINT")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            request_timeout: env_secs(
                "WAYPOINT_UPSTREAM_HTTP_TIMEOUT_SECS",
                DEFAULT_UPSTREAM_HTTP_TIMEOUT_SECS,
            ),
            connect_timeout: env_secs(
                "WAYPOINT_UPSTREAM_CONNECT_TIMEOUT_SECS",
                DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS,
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    pub stabilizer: StabilizerConfig,
    pub governor: GovernorConfig,
    pub tile_cache: TileCacheConfig,
    pub coordinator: CoordinatorConfig,
    pub http: HttpBackendConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            stabilizer: StabilizerConfig::from_env(),
            governor: GovernorConfig::from_env(),
            tile_cache: TileCacheConfig::from_env(),
            coordinator: CoordinatorConfig::from_env(),
            http: HttpBackendConfig::from_env(),
        }
    }
}
