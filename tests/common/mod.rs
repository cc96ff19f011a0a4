// SPDX-License-Identifier: MIT

use liftline::cache::HotCache;
use liftline::config::Config;
use liftline::db::WarmDb;

/// Check if a test Redis is available via environment variable.
pub fn redis_available() -> bool {
    std::env::var("REDIS_URL").is_ok()
}

/// Check if a test Postgres (with PostGIS) is available.
pub fn postgres_available() -> bool {
    std::env::var("DATABASE_URL").is_ok()
}

/// Skip test with message if Redis is not available.
#[macro_export]
macro_rules! require_redis {
    () => {
        if !crate::common::redis_available() {
            eprintln!("⚠️  Skipping: REDIS_URL not set");
            return;
        }
    };
}

/// Skip test with message if Postgres is not available.
#[macro_export]
macro_rules! require_postgres {
    () => {
        if !crate::common::postgres_available() {
            eprintln!("⚠️  Skipping: DATABASE_URL not set");
            return;
        }
    };
}

/// Test configuration pointing at the backends from the environment.
pub fn test_config() -> Config {
    let mut config = Config::default();
    if let Ok(url) = std::env::var("REDIS_URL") {
        config.redis_url = url;
    }
    if let Ok(dsn) = std::env::var("DATABASE_URL") {
        config.database_url = dsn;
    }
    config
}

/// Connect to the test Redis.
pub async fn hot() -> HotCache {
    HotCache::connect(&test_config())
        .await
        .expect("Failed to connect to test Redis")
}

/// Connect to the test Postgres and make sure the owned schema exists.
pub async fn warm() -> WarmDb {
    let warm = WarmDb::connect(&test_config())
        .await
        .expect("Failed to connect to test Postgres");
    bootstrap_schema(&warm).await;
    warm
}

/// A unique id so concurrent tests never collide on shared tables/keys.
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Create the tables the core owns (plus minimal stand-ins for the seeded
/// social tables) on the test database. Requires PostGIS.
async fn bootstrap_schema(warm: &WarmDb) {
    let statements = [
        "CREATE EXTENSION IF NOT EXISTS postgis",
        "CREATE TABLE IF NOT EXISTS ski_sessions (
             id UUID PRIMARY KEY,
             user_id TEXT NOT NULL,
             resort_id TEXT,
             start_time TIMESTAMPTZ NOT NULL,
             end_time TIMESTAMPTZ,
             is_active BOOLEAN NOT NULL,
             total_vertical_m DOUBLE PRECISION NOT NULL DEFAULT 0,
             total_distance_m DOUBLE PRECISION NOT NULL DEFAULT 0,
             max_speed_mps DOUBLE PRECISION NOT NULL DEFAULT 0
         )",
        "CREATE TABLE IF NOT EXISTS location_pings (
             id BIGSERIAL PRIMARY KEY,
             session_id UUID NOT NULL,
             user_id TEXT NOT NULL,
             geom geometry(Point, 4326) NOT NULL,
             altitude_m DOUBLE PRECISION NOT NULL,
             speed_mps DOUBLE PRECISION NOT NULL,
             accuracy_m DOUBLE PRECISION NOT NULL,
             heading_deg DOUBLE PRECISION,
             recorded_at TIMESTAMPTZ NOT NULL
         )",
        "CREATE TABLE IF NOT EXISTS messages (
             id UUID PRIMARY KEY,
             sender_id TEXT NOT NULL,
             group_id TEXT,
             recipient_id TEXT,
             content TEXT NOT NULL,
             metadata TEXT,
             read_by TEXT[] NOT NULL DEFAULT '{}',
             sent_at TIMESTAMPTZ NOT NULL
         )",
        "CREATE TABLE IF NOT EXISTS friendships (
             user_id TEXT NOT NULL,
             friend_id TEXT NOT NULL,
             status TEXT NOT NULL
         )",
        "CREATE TABLE IF NOT EXISTS group_members (
             group_id TEXT NOT NULL,
             user_id TEXT NOT NULL
         )",
        "CREATE TABLE IF NOT EXISTS users (
             id TEXT PRIMARY KEY,
             display_name TEXT NOT NULL
         )",
    ];
    for statement in statements {
        sqlx::query(statement)
            .execute(warm.pool())
            .await
            .expect("Schema bootstrap failed");
    }
}

/// Seed an accepted friendship (one direction; lookups are agnostic).
pub async fn seed_friendship(warm: &WarmDb, a: &str, b: &str, status: &str) {
    sqlx::query("INSERT INTO friendships (user_id, friend_id, status) VALUES ($1, $2, $3)")
        .bind(a)
        .bind(b)
        .bind(status)
        .execute(warm.pool())
        .await
        .expect("Failed to seed friendship");
}

/// Seed a user row with a display name.
pub async fn seed_user(warm: &WarmDb, id: &str, display_name: &str) {
    sqlx::query(
        "INSERT INTO users (id, display_name) VALUES ($1, $2)
         ON CONFLICT (id) DO UPDATE SET display_name = EXCLUDED.display_name",
    )
    .bind(id)
    .bind(display_name)
    .execute(warm.pool())
    .await
    .expect("Failed to seed user");
}

/// Seed a group membership row.
pub async fn seed_group_member(warm: &WarmDb, group_id: &str, user_id: &str) {
    sqlx::query("INSERT INTO group_members (group_id, user_id) VALUES ($1, $2)")
        .bind(group_id)
        .bind(user_id)
        .execute(warm.pool())
        .await
        .expect("Failed to seed group member");
}

// ─── Full engine stack ───────────────────────────────────────────

use liftline::services::{ChatEngine, JobQueue, LocationEngine};
use liftline::ws::{Backplane, Connection, ConnectionRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Both engines wired to the live backends, with the backplane listener
/// running, mirroring the node's own startup order.
pub struct TestStack {
    pub hot: HotCache,
    pub warm: WarmDb,
    pub registry: Arc<ConnectionRegistry>,
    pub backplane: Arc<Backplane>,
    pub location: Arc<LocationEngine>,
    pub chat: Arc<ChatEngine>,
}

/// Build a full engine stack. Callers must gate on both backends first.
pub async fn stack() -> TestStack {
    let config = test_config();
    let hot = HotCache::connect(&config).await.expect("redis");
    let warm = warm().await;

    let registry = Arc::new(ConnectionRegistry::new(hot.clone()));
    let (backplane, listener) = Backplane::new(hot.clone());
    tokio::spawn(listener.run(registry.clone()));

    let queue = JobQueue::new(hot.clone());
    let location = Arc::new(LocationEngine::new(
        hot.clone(),
        warm.clone(),
        queue.clone(),
        backplane.clone(),
        &config,
    ));
    let chat = Arc::new(ChatEngine::new(
        hot.clone(),
        warm.clone(),
        queue,
        backplane.clone(),
        registry.clone(),
        &config,
    ));

    TestStack {
        hot,
        warm,
        registry,
        backplane,
        location,
        chat,
    }
}

/// Attach a user the way the gateway would: registered handle plus the
/// node's subscription to the user's fan-out channel.
pub async fn connect_user(
    stack: &TestStack,
    user_id: &str,
) -> (Arc<Connection>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (conn, first_local) = stack
        .registry
        .attach(user_id, tx)
        .await
        .expect("attach failed");
    if first_local {
        stack.backplane.subscribe_user(user_id);
    }
    (conn, rx)
}

/// Wait briefly for an outbound frame and parse it.
pub async fn recv_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> Option<serde_json::Value> {
    match tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv()).await {
        Ok(Some(raw)) => Some(serde_json::from_str(&raw).expect("frame must be JSON")),
        _ => None,
    }
}

/// Give the backplane listener time to apply a pending SUBSCRIBE before a
/// test publishes through the bus.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(250)).await;
}
