//! Application configuration loaded from environment variables.
//!
//! Secrets (Supabase keys, Mapbox token) are read once at startup and kept
//! in memory.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default proximity threshold in meters.
pub const DEFAULT_PROXIMITY_THRESHOLD_METERS: f64 = 700.0;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Environment Variables (non-sensitive) ---
    /// Frontend URL allowed by CORS
    pub frontend_url: String,
    /// Server port
    pub port: u16,
    /// Supabase project URL; `None` runs against the in-memory store
    pub supabase_url: Option<String>,
    /// Mapbox API base URL
    pub mapbox_base_url: String,

    // --- Secrets ---
    /// Supabase service-role key used for REST calls
    pub supabase_service_key: String,
    /// JWT secret used to verify session tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,
    /// Mapbox access token
    pub mapbox_access_token: String,

    // --- Ride engine tuning ---
    pub ride: RideConfig,
}

/// Tuning knobs for the ride engine.
#[derive(Debug, Clone)]
pub struct RideConfig {
    /// A user is "nearby" a scooter when strictly closer than this
    pub proximity_threshold_meters: f64,
    /// Bound on every persistence store call
    pub store_timeout: Duration,
    /// Bound on each route reconciliation attempt
    pub reconcile_timeout: Duration,
    /// Retry policy for transient reconciliation failures
    pub reconcile_retry: RetryPolicy,
}

impl Default for RideConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_meters: DEFAULT_PROXIMITY_THRESHOLD_METERS,
            store_timeout: Duration::from_secs(10),
            reconcile_timeout: Duration::from_secs(15),
            reconcile_retry: RetryPolicy::default(),
        }
    }
}

/// Bounded retry with linear backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.base_backoff_ms.saturating_mul(attempt as u64))
    }
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            frontend_url: "http://localhost:8081".to_string(),
            port: 8080,
            supabase_url: None,
            mapbox_base_url: "https://api.mapbox.com".to_string(),
            supabase_service_key: "test_service_key".to_string(),
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            mapbox_access_token: "test_mapbox_token".to_string(),
            ride: RideConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file is honoured for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let supabase_url = env::var("SUPABASE_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let supabase_service_key = match &supabase_url {
            Some(_) => env::var("SUPABASE_SERVICE_KEY")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("SUPABASE_SERVICE_KEY"))?,
            None => String::new(),
        };

        let proximity_threshold_meters: f64 =
            parse_var("PROXIMITY_THRESHOLD_METERS", DEFAULT_PROXIMITY_THRESHOLD_METERS)?;
        if !proximity_threshold_meters.is_finite() || proximity_threshold_meters <= 0.0 {
            return Err(ConfigError::Invalid("PROXIMITY_THRESHOLD_METERS"));
        }

        let max_attempts: usize = parse_var("RECONCILE_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid("RECONCILE_MAX_ATTEMPTS"));
        }

        Ok(Self {
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            supabase_url,
            mapbox_base_url: env::var("MAPBOX_BASE_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "https://api.mapbox.com".to_string()),

            supabase_service_key,
            jwt_signing_key: env::var("SUPABASE_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("SUPABASE_JWT_SECRET"))?
                .into_bytes(),
            mapbox_access_token: env::var("MAPBOX_ACCESS_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("MAPBOX_ACCESS_TOKEN"))?,

            ride: RideConfig {
                proximity_threshold_meters,
                store_timeout: timeout_secs(
                    "STORE_TIMEOUT_SECS",
                    parse_var("STORE_TIMEOUT_SECS", 10)?,
                )?,
                reconcile_timeout: timeout_secs(
                    "RECONCILE_TIMEOUT_SECS",
                    parse_var("RECONCILE_TIMEOUT_SECS", 15)?,
                )?,
                reconcile_retry: RetryPolicy {
                    max_attempts,
                    base_backoff_ms: parse_var("RECONCILE_BACKOFF_MS", 250)?,
                },
            },
        })
    }
}

/// Read an optional variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// A zero timeout would fail every call before it starts.
fn timeout_secs(name: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Invalid(name));
    }
    Ok(Duration::from_secs(secs))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
