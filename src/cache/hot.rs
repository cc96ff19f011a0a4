// SPDX-License-Identifier: MIT

//! Typed wrapper over the shared in-memory datastore.
//!
//! One multiplexed connection serves every command path; pub/sub uses a
//! dedicated connection owned by the backplane listener (see
//! `ws::backplane`). Every call is bounded by the configured hot timeout and
//! surfaces expiry as a transient failure, per the suspension-point rules.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, IntoConnectionInfo};

use crate::config::Config;
use crate::error::{AppError, Result};

/// One member returned by a geo radius query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMember {
    pub member: String,
    pub distance_m: f64,
    pub lon: f64,
    pub lat: f64,
}

/// Shared hot-store client. Cheap to clone; handlers receive it by
/// reference from `AppState`, never through a global.
#[derive(Clone)]
pub struct HotCache {
    client: redis::Client,
    conn: MultiplexedConnection,
    timeout: Duration,
}

impl HotCache {
    /// Connect to the hot store. A standalone password option is merged
    /// into the endpoint URL when the URL itself carries none.
    pub async fn connect(config: &Config) -> Result<Self> {
        let mut info = config
            .redis_url
            .as_str()
            .into_connection_info()
            .map_err(AppError::from)?;
        if info.redis.password.is_none() {
            info.redis.password = config.redis_password.clone();
        }

        let client = redis::Client::open(info).map_err(AppError::from)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::from)?;

        tracing::info!(endpoint = %config.redis_url, "Connected to hot store");

        Ok(Self {
            client,
            conn,
            timeout: config.hot_timeout(),
        })
    }

    /// The underlying client, for carving out dedicated pub/sub connections.
    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    /// Bound a hot-store call by the configured timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::Transient("redis: operation timed out".to_string())),
        }
    }

    // --- Keys with TTL ---

    pub async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.set_ex(key, value, ttl_seconds).await })
            .await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        self.bounded(async move { conn.get(key).await }).await
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.del(key).await }).await
    }

    pub async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.expire(key, ttl_seconds).await })
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn();
        self.bounded(async move { conn.exists(key).await }).await
    }

    /// Pattern-bounded key scan. Only ever called with a fixed prefix
    /// pattern; never with `*` alone.
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        self.bounded(async move { conn.keys(pattern).await }).await
    }

    // --- Hashes ---

    pub async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.hset_multiple(key, fields).await })
            .await
    }

    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn();
        self.bounded(async move { conn.hgetall(key).await }).await
    }

    // --- Lists ---

    pub async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.lpush(key, value).await })
            .await
    }

    pub async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.ltrim(key, start, stop).await })
            .await
    }

    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn();
        self.bounded(async move { conn.lrange(key, start, stop).await })
            .await
    }

    pub async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn();
        self.bounded(async move { conn.llen(key).await }).await
    }

    pub async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        self.bounded(async move { conn.rpop(key, None).await }).await
    }

    // --- Sets ---

    pub async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.sadd(key, member).await })
            .await
    }

    pub async fn sadd_all(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        self.bounded(async move { conn.sadd(key, members).await })
            .await
    }

    pub async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.srem(key, member).await })
            .await
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        self.bounded(async move { conn.smembers(key).await }).await
    }

    pub async fn scard(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn();
        self.bounded(async move { conn.scard(key).await }).await
    }

    // --- Geo ---

    /// Add or move a member in a geo set. Redis stores geo sets as sorted
    /// sets, so removal goes through `zrem`.
    pub async fn geo_add(&self, key: &str, lon: f64, lat: f64, member: &str) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move {
            redis::cmd("GEOADD")
                .arg(key)
                .arg(lon)
                .arg(lat)
                .arg(member)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    pub async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.zrem(key, member).await })
            .await
    }

    /// Current (lon, lat) of a geo member, if present.
    pub async fn geo_pos(&self, key: &str, member: &str) -> Result<Option<(f64, f64)>> {
        let mut conn = self.conn();
        let raw: Vec<Option<(f64, f64)>> = self
            .bounded(async move {
                redis::cmd("GEOPOS")
                    .arg(key)
                    .arg(member)
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(raw.into_iter().next().flatten())
    }

    /// Members within `radius_m` meters of (lon, lat), with distance and
    /// coordinates, nearest first.
    pub async fn geo_radius(
        &self,
        key: &str,
        lon: f64,
        lat: f64,
        radius_m: f64,
    ) -> Result<Vec<GeoMember>> {
        let mut conn = self.conn();
        let raw: Vec<(String, f64, (f64, f64))> = self
            .bounded(async move {
                redis::cmd("GEORADIUS")
                    .arg(key)
                    .arg(lon)
                    .arg(lat)
                    .arg(radius_m)
                    .arg("m")
                    .arg("WITHDIST")
                    .arg("WITHCOORD")
                    .arg("ASC")
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(raw
            .into_iter()
            .map(|(member, distance_m, (lon, lat))| GeoMember {
                member,
                distance_m,
                lon,
                lat,
            })
            .collect())
    }

    // --- Pub/sub ---

    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn();
        self.bounded(async move { conn.publish(channel, payload).await })
            .await
    }
}
