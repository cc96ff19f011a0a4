// SPDX-License-Identifier: MIT

//! Live location engine.
//!
//! Ingests pings from the gateway, enforces the per-connection throttle,
//! keeps the hot geo index fresh, enqueues durable persistence, and fans
//! updates out to nearby accepted friends. The hot path is the contract:
//! once the presence write lands, the ping is acknowledged even if the
//! persistence enqueue or the fan-out misbehaves.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{keys, GeoMember, HotCache};
use crate::config::Config;
use crate::db::WarmDb;
use crate::error::{AppError, Result};
use crate::models::PingRecord;
use crate::services::jobs::{JobQueue, TOPIC_LOCATION_PINGS};
use crate::time_utils::{from_epoch_millis, to_epoch_millis};
use crate::ws::backplane::Backplane;
use crate::ws::frames::{
    BasicAck, LocationPingPayload, LocationSubscribePayload, LocationUpdate, ProximityAlert,
    ServerEvent, SessionEndPayload, SessionStartAck, SessionEndAck, SessionStartPayload,
};
use crate::ws::registry::Connection;

/// A friend within 100 m triggers a proximity alert to the pinger.
pub const PROXIMITY_ALERT_METERS: f64 = 100.0;

/// A friend currently visible in the hot geo index near a pinging user.
#[derive(Debug, Clone)]
pub struct NearbyFriend {
    pub friend_id: String,
    pub friend_name: String,
    pub distance_m: f64,
    pub lat: f64,
    pub lon: f64,
}

pub struct LocationEngine {
    hot: HotCache,
    warm: WarmDb,
    queue: JobQueue,
    backplane: Arc<Backplane>,
    throttle_window: Duration,
    search_radius_m: f64,
    presence_ttl_seconds: i64,
}

impl LocationEngine {
    pub fn new(
        hot: HotCache,
        warm: WarmDb,
        queue: JobQueue,
        backplane: Arc<Backplane>,
        config: &Config,
    ) -> Self {
        Self {
            hot,
            warm,
            queue,
            backplane,
            throttle_window: config.ping_throttle(),
            search_radius_m: config.proximity_radius_meters,
            presence_ttl_seconds: config.presence_ttl_seconds,
        }
    }

    // ─── Session Lifecycle ───────────────────────────────────────

    /// `session:start`. Any prior active session for the user is closed in
    /// the same transaction that inserts the new one.
    pub async fn start_session(
        &self,
        user_id: &str,
        payload: SessionStartPayload,
    ) -> Result<SessionStartAck> {
        let session = self
            .warm
            .start_session(user_id, payload.resort_id.as_deref())
            .await?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            resort_id = ?session.resort_id,
            "Session started"
        );

        Ok(SessionStartAck {
            success: true,
            session_id: session.id,
            start_time: to_epoch_millis(session.start_time),
        })
    }

    /// `session:end`. On durable failure the hot presence is left alone so
    /// the client can retry; on success the presence is cleared best-effort
    /// (its TTL is the backstop).
    pub async fn end_session(
        &self,
        user_id: &str,
        payload: SessionEndPayload,
    ) -> Result<SessionEndAck> {
        let session = self.warm.end_session(payload.session_id, user_id).await?;
        let summary = session.summary();

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            duration_seconds = summary.duration_seconds,
            total_distance = summary.total_distance,
            "Session ended"
        );

        if let Err(e) = self.clear_presence(user_id).await {
            tracing::warn!(user_id = %user_id, error = %e, "Presence cleanup after session end failed");
        }

        Ok(SessionEndAck {
            success: true,
            summary,
        })
    }

    // ─── Ping Ingestion ──────────────────────────────────────────

    /// `location:ping`, the authoritative algorithm: throttle, validate,
    /// hot write, enqueue, fan out.
    pub async fn handle_ping(
        &self,
        conn: &Arc<Connection>,
        payload: LocationPingPayload,
    ) -> Result<BasicAck> {
        if !conn.throttle_allows(Instant::now(), self.throttle_window) {
            return Err(AppError::Throttled);
        }

        let record = PingRecord {
            session_id: payload.session_id,
            user_id: conn.user_id.clone(),
            lat: payload.lat,
            lon: payload.lon,
            altitude_m: payload.altitude,
            speed_mps: payload.speed,
            accuracy_m: payload.accuracy,
            heading_deg: payload.heading,
            recorded_at: from_epoch_millis(payload.timestamp),
        };
        record.validate().map_err(AppError::Validation)?;

        // Hot presence is the contract; failure here fails the ping and
        // skips the persistence enqueue.
        self.write_presence(&record).await?;

        if let Err(e) = self.queue.enqueue(TOPIC_LOCATION_PINGS, &record).await {
            tracing::warn!(
                user_id = %conn.user_id,
                session_id = %record.session_id,
                error = %e,
                "Ping persistence enqueue failed; hot path unaffected"
            );
        }

        if let Err(e) = self.fan_out(conn, &record).await {
            tracing::warn!(user_id = %conn.user_id, error = %e, "Ping fan-out failed");
        }

        Ok(BasicAck::ok())
    }

    /// `location:subscribe`. Records the declared interest list; live
    /// fan-out stays gated by accepted friendship alone.
    pub async fn subscribe(
        &self,
        user_id: &str,
        payload: LocationSubscribePayload,
    ) -> Result<BasicAck> {
        let key = keys::location_subscriptions(user_id);
        self.hot.del(&key).await?;
        self.hot.sadd_all(&key, &payload.friend_ids).await?;
        if !payload.friend_ids.is_empty() {
            self.hot.expire(&key, self.presence_ttl_seconds).await?;
        }
        Ok(BasicAck::ok())
    }

    /// Drop a user's hot presence (geo member + location hash). Called on
    /// session end and on fleet-wide disconnect; never ends the session.
    pub async fn clear_presence(&self, user_id: &str) -> Result<()> {
        self.hot.zrem(keys::GEO_USERS, user_id).await?;
        self.hot.del(&keys::location(user_id)).await?;
        tracing::debug!(user_id = %user_id, "Hot presence cleared");
        Ok(())
    }

    async fn write_presence(&self, record: &PingRecord) -> Result<()> {
        let location_key = keys::location(&record.user_id);

        self.hot
            .geo_add(keys::GEO_USERS, record.lon, record.lat, &record.user_id)
            .await?;
        self.hot
            .hset_all(&location_key, &presence_fields(record))
            .await?;
        self.hot
            .expire(keys::GEO_USERS, self.presence_ttl_seconds)
            .await?;
        self.hot
            .expire(&location_key, self.presence_ttl_seconds)
            .await?;
        Ok(())
    }

    // ─── Fan-out ─────────────────────────────────────────────────

    async fn fan_out(&self, conn: &Arc<Connection>, record: &PingRecord) -> Result<()> {
        let nearby = self
            .nearby_friends(&conn.user_id, record.lon, record.lat)
            .await?;
        if nearby.is_empty() {
            return Ok(());
        }

        let display_name = self.warm.display_name(&conn.user_id).await.unwrap_or(None);

        for friend in &nearby {
            // Only publish toward friends that are online somewhere in the
            // fleet; the hosting node delivers to their connections.
            let online = self
                .hot
                .scard(&keys::connections(&friend.friend_id))
                .await
                .unwrap_or(0)
                > 0;
            if online {
                let update = ServerEvent::LocationUpdate(LocationUpdate {
                    user_id: conn.user_id.clone(),
                    display_name: display_name.clone(),
                    lat: record.lat,
                    lon: record.lon,
                    altitude: record.altitude_m,
                    speed: record.speed_mps,
                    heading: record.heading_deg,
                    distance: friend.distance_m,
                    timestamp: to_epoch_millis(record.recorded_at),
                });
                if let Err(e) = self
                    .backplane
                    .publish_to_user(&friend.friend_id, update)
                    .await
                {
                    tracing::warn!(friend_id = %friend.friend_id, error = %e, "Location update publish failed");
                }
            }

            // The proximity alert goes to the PINGER, not the friend.
            if friend.distance_m < PROXIMITY_ALERT_METERS {
                conn.send_event(&ServerEvent::Proximity(ProximityAlert {
                    friend_id: friend.friend_id.clone(),
                    friend_name: friend.friend_name.clone(),
                    distance: friend.distance_m,
                    lat: friend.lat,
                    lon: friend.lon,
                }));
            }
        }

        Ok(())
    }

    /// Accepted friends currently inside the search radius, nearest first
    /// (ties by id). A friend whose presence TTL has lapsed is simply
    /// absent; proximity is best-effort eventually consistent.
    pub async fn nearby_friends(
        &self,
        user_id: &str,
        lon: f64,
        lat: f64,
    ) -> Result<Vec<NearbyFriend>> {
        let friends = self.warm.accepted_friend_ids(user_id).await?;
        if friends.is_empty() {
            return Ok(Vec::new());
        }

        let members = self
            .hot
            .geo_radius(keys::GEO_USERS, lon, lat, self.search_radius_m)
            .await?;

        let mut result = Vec::new();
        for member in filter_friend_members(members, user_id, &friends) {
            // The geo set carries one TTL for everyone; the per-user hash is
            // the individual liveness signal. No hash, no presence.
            if !self
                .hot
                .exists(&keys::location(&member.member))
                .await
                .unwrap_or(false)
            {
                continue;
            }
            let Some(friend_name) = self.warm.display_name(&member.member).await? else {
                continue;
            };
            result.push(NearbyFriend {
                friend_id: member.member,
                friend_name,
                distance_m: member.distance_m,
                lat: member.lat,
                lon: member.lon,
            });
        }

        result.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.friend_id.cmp(&b.friend_id))
        });
        Ok(result)
    }
}

/// Keep radius members that are accepted friends and not the pinger.
fn filter_friend_members(
    members: Vec<GeoMember>,
    user_id: &str,
    friends: &HashSet<String>,
) -> Vec<GeoMember> {
    members
        .into_iter()
        .filter(|m| m.member != user_id && friends.contains(&m.member))
        .collect()
}

/// The hash fields mirroring the latest accepted ping.
fn presence_fields(record: &PingRecord) -> Vec<(String, String)> {
    let mut fields = vec![
        ("sessionId".to_string(), record.session_id.to_string()),
        ("lat".to_string(), record.lat.to_string()),
        ("lon".to_string(), record.lon.to_string()),
        ("altitude".to_string(), record.altitude_m.to_string()),
        ("speed".to_string(), record.speed_mps.to_string()),
        ("accuracy".to_string(), record.accuracy_m.to_string()),
        (
            "timestamp".to_string(),
            to_epoch_millis(record.recorded_at).to_string(),
        ),
    ];
    if let Some(heading) = record.heading_deg {
        fields.push(("heading".to_string(), heading.to_string()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, distance_m: f64) -> GeoMember {
        GeoMember {
            member: id.to_string(),
            distance_m,
            lon: -105.95,
            lat: 39.6,
        }
    }

    #[test]
    fn test_filter_keeps_only_accepted_friends() {
        let friends: HashSet<String> = ["ub-2".to_string(), "uc-3".to_string()].into();
        let members = vec![
            member("ua-1", 0.1),  // the pinger themselves
            member("ub-2", 42.0), // friend
            member("ux-9", 10.0), // stranger in range
            member("uc-3", 310.0),
        ];

        let kept = filter_friend_members(members, "ua-1", &friends);
        let ids: Vec<&str> = kept.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(ids, vec!["ub-2", "uc-3"]);
    }

    #[test]
    fn test_filter_with_no_friends_is_empty() {
        let kept = filter_friend_members(vec![member("ub-2", 5.0)], "ua-1", &HashSet::new());
        assert!(kept.is_empty());
    }

    #[test]
    fn test_presence_fields_mirror_the_ping() {
        let record = PingRecord {
            session_id: uuid::Uuid::new_v4(),
            user_id: "ua-1".to_string(),
            lat: 39.6042,
            lon: -105.9538,
            altitude_m: 2900.0,
            speed_mps: 12.0,
            accuracy_m: 4.0,
            heading_deg: None,
            recorded_at: chrono::Utc::now(),
        };
        let fields = presence_fields(&record);
        assert!(fields.iter().any(|(k, v)| k == "lat" && v == "39.6042"));
        assert!(!fields.iter().any(|(k, _)| k == "heading"));

        let mut with_heading = record;
        with_heading.heading_deg = Some(90.0);
        let fields = presence_fields(&with_heading);
        assert!(fields.iter().any(|(k, v)| k == "heading" && v == "90"));
    }

    #[test]
    fn test_proximity_threshold_is_strict() {
        // The alert fires strictly under 100 m.
        assert!(99.999 < PROXIMITY_ALERT_METERS);
        assert!(!(100.0 < PROXIMITY_ALERT_METERS));
    }
}
