//! Application configuration loaded from environment variables.
//!
//! Everything is read once at startup and passed by value into `AppState`;
//! there are no global singletons. Tunables default to the documented
//! operator values so a bare `REDIS_URL` + `DATABASE_URL` + `JWT_SIGNING_KEY`
//! environment is enough to boot a node.

use std::env;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Connections ---
    /// Redis endpoint for the hot store and pub/sub backplane
    pub redis_url: String,
    /// Optional Redis password (for endpoints whose URL carries none)
    pub redis_password: Option<String>,
    /// PostgreSQL DSN for the durable store
    pub database_url: String,
    /// Server port
    pub port: u16,

    // --- Auth ---
    /// HS256 signing key for verifying bearer tokens (raw bytes)
    pub jwt_signing_key: Vec<u8>,

    // --- Realtime tunables ---
    /// Hard per-connection floor between accepted pings
    pub ping_throttle_ms: u64,
    /// Radius of the nearby-friends geo query, meters
    pub proximity_radius_meters: f64,
    /// Sliding TTL on the hot presence records (geo member + location hash)
    pub presence_ttl_seconds: i64,
    /// Maximum cached messages per chat room
    pub chat_cache_size: usize,
    /// TTL of a room's message cache, refreshed on access
    pub chat_cache_ttl_seconds: i64,
    /// TTL of a typing flag; clients re-assert while typing
    pub typing_ttl_seconds: i64,

    // --- Persister tunables ---
    /// Flush the ping buffer when it reaches this many entries
    pub batch_size: usize,
    /// ... or when this many milliseconds have elapsed with a non-empty buffer
    pub batch_flush_ms: u64,

    // --- Timeouts ---
    /// Bound on every durable-store call
    pub warm_timeout_ms: u64,
    /// Bound on every hot-store call
    pub hot_timeout_ms: u64,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            redis_password: None,
            database_url: "postgres://localhost/liftline_test".to_string(),
            port: 8080,
            jwt_signing_key: b"test_jwt_key_32_bytes_minimum!!".to_vec(),
            ping_throttle_ms: 1000,
            proximity_radius_meters: 500.0,
            presence_ttl_seconds: 300,
            chat_cache_size: 50,
            chat_cache_ttl_seconds: 3600,
            typing_ttl_seconds: 5,
            batch_size: 100,
            batch_flush_ms: 5000,
            warm_timeout_ms: 5000,
            hot_timeout_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            redis_url: env::var("REDIS_URL").map_err(|_| ConfigError::Missing("REDIS_URL"))?,
            redis_password: env::var("REDIS_PASSWORD").ok(),
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            port: parse_or("PORT", 8080),
            jwt_signing_key: env::var("JWT_SIGNING_KEY")
                .map_err(|_| ConfigError::Missing("JWT_SIGNING_KEY"))?
                .into_bytes(),
            ping_throttle_ms: parse_or("PING_THROTTLE_MS", 1000),
            proximity_radius_meters: parse_or("PROXIMITY_RADIUS_METERS", 500.0),
            presence_ttl_seconds: parse_or("PRESENCE_TTL_SECONDS", 300),
            chat_cache_size: parse_or("CHAT_CACHE_SIZE", 50),
            chat_cache_ttl_seconds: parse_or("CHAT_CACHE_TTL_SECONDS", 3600),
            typing_ttl_seconds: parse_or("TYPING_TTL_SECONDS", 5),
            batch_size: parse_or("BATCH_SIZE", 100),
            batch_flush_ms: parse_or("BATCH_FLUSH_MS", 5000),
            warm_timeout_ms: parse_or("WARM_TIMEOUT_MS", 5000),
            hot_timeout_ms: parse_or("HOT_TIMEOUT_MS", 1000),
        })
    }

    /// Bound on every hot-store call.
    pub fn hot_timeout(&self) -> Duration {
        Duration::from_millis(self.hot_timeout_ms)
    }

    /// Bound on every durable-store call.
    pub fn warm_timeout(&self) -> Duration {
        Duration::from_millis(self.warm_timeout_ms)
    }

    /// Hard floor between accepted pings on one connection.
    pub fn ping_throttle(&self) -> Duration {
        Duration::from_millis(self.ping_throttle_ms)
    }
}

/// Parse an environment variable, falling back to the default when it is
/// absent or malformed.
fn parse_or<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
}
