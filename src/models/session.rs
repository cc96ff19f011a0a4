//! Ski session rows and the summary returned on `session:end`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A per-user tracking session.
///
/// Durable in `ski_sessions`; the hot store only ever holds presence derived
/// from it. At most one session per user has `is_active = true`, and
/// `end_time` is null exactly while active. The running aggregates are
/// monotonically non-decreasing while the session is open — the persister
/// only ever adds distance and vertical and takes the max of speeds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SkiSession {
    pub id: Uuid,
    pub user_id: String,
    pub resort_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub total_vertical_m: f64,
    pub total_distance_m: f64,
    pub max_speed_mps: f64,
}

impl SkiSession {
    /// The summary handed back to the client when the session ends.
    ///
    /// Duration truncates to whole seconds; a session with no `end_time`
    /// yet reports zero rather than guessing at "now".
    pub fn summary(&self) -> SessionSummary {
        let duration_seconds = self
            .end_time
            .map(|end| (end - self.start_time).num_seconds().max(0))
            .unwrap_or(0);

        SessionSummary {
            total_vertical: self.total_vertical_m,
            total_distance: self.total_distance_m,
            max_speed: self.max_speed_mps,
            duration_seconds,
        }
    }
}

/// Aggregates returned by `session:end`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_vertical: f64,
    pub total_distance: f64,
    pub max_speed: f64,
    pub duration_seconds: i64,
}
