// SPDX-License-Identifier: MIT

//! Durable-store integration tests.
//!
//! Run against a live Postgres (with PostGIS) when DATABASE_URL is set;
//! skipped otherwise. These pin the session invariant, the aggregate
//! updates, read-receipt idempotency, and the social-graph lookups.

mod common;

use chrono::{Duration, Utc};
use liftline::db::SessionDelta;
use liftline::error::AppError;
use liftline::models::{MessageMetadata, PingRecord, Room};
use sqlx::Row;

#[tokio::test]
async fn test_at_most_one_active_session_per_user() {
    require_postgres!();
    let warm = common::warm().await;
    let user_id = common::unique("ua");

    let first = warm.start_session(&user_id, Some("keystone")).await.unwrap();
    let second = warm.start_session(&user_id, None).await.unwrap();
    assert_ne!(first.id, second.id);

    let active: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM ski_sessions WHERE user_id = $1 AND is_active = TRUE",
    )
    .bind(&user_id)
    .fetch_one(warm.pool())
    .await
    .unwrap()
    .try_get("n")
    .unwrap();
    assert_eq!(active, 1, "starting again must close the prior session");

    // The pre-closed session got its end stamped.
    let closed = warm.get_session(first.id).await.unwrap().unwrap();
    assert!(!closed.is_active);
    assert!(closed.end_time.is_some());
}

#[tokio::test]
async fn test_end_session_checks_ownership_and_liveness() {
    require_postgres!();
    let warm = common::warm().await;
    let user_id = common::unique("ua");

    let session = warm.start_session(&user_id, None).await.unwrap();

    // Someone else cannot end it.
    let stranger = warm.end_session(session.id, "someone-else").await;
    assert!(matches!(stranger, Err(AppError::NotFound(_))));

    let ended = warm.end_session(session.id, &user_id).await.unwrap();
    assert!(!ended.is_active);
    assert!(ended.end_time.is_some());
    assert!(ended.summary().duration_seconds >= 0);

    // Ending twice is NotFound: the session is no longer active.
    let again = warm.end_session(session.id, &user_id).await;
    assert!(matches!(again, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_ping_batch_insert_and_monotonic_aggregates() {
    require_postgres!();
    let warm = common::warm().await;
    let user_id = common::unique("ua");
    let session = warm.start_session(&user_id, None).await.unwrap();

    let base = Utc::now();
    let ping = |lat: f64, altitude_m: f64, speed_mps: f64, offset: i64| PingRecord {
        session_id: session.id,
        user_id: user_id.clone(),
        lat,
        lon: -105.9538,
        altitude_m,
        speed_mps,
        accuracy_m: 3.0,
        heading_deg: Some(12.0),
        recorded_at: base + Duration::seconds(offset),
    };

    let batch = vec![
        ping(39.6042, 3000.0, 8.0, 0),
        ping(39.6051, 2990.0, 14.5, 10),
        ping(39.6060, 2985.0, 11.0, 20),
    ];
    let deltas = vec![(
        session.id,
        SessionDelta {
            additional_distance_m: 200.0,
            vertical_descent_m: 15.0,
            max_speed_mps: 14.5,
        },
    )];
    warm.persist_ping_batch(&batch, &deltas).await.unwrap();

    let rows: i64 = sqlx::query("SELECT COUNT(*) AS n FROM location_pings WHERE session_id = $1")
        .bind(session.id)
        .fetch_one(warm.pool())
        .await
        .unwrap()
        .try_get("n")
        .unwrap();
    assert_eq!(rows, 3);

    let updated = warm.get_session(session.id).await.unwrap().unwrap();
    assert!((updated.total_distance_m - 200.0).abs() < f64::EPSILON);
    assert!((updated.total_vertical_m - 15.0).abs() < f64::EPSILON);
    assert!((updated.max_speed_mps - 14.5).abs() < f64::EPSILON);

    // A second batch with a lower max speed must not regress the maximum.
    let slow_delta = vec![(
        session.id,
        SessionDelta {
            additional_distance_m: 50.0,
            vertical_descent_m: 5.0,
            max_speed_mps: 6.0,
        },
    )];
    warm.persist_ping_batch(&[ping(39.6069, 2980.0, 6.0, 30)], &slow_delta)
        .await
        .unwrap();

    let updated = warm.get_session(session.id).await.unwrap().unwrap();
    assert!((updated.total_distance_m - 250.0).abs() < f64::EPSILON);
    assert!((updated.max_speed_mps - 14.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_read_receipts_are_idempotent() {
    require_postgres!();
    let warm = common::warm().await;
    let (a, b) = (common::unique("ua"), common::unique("ub"));

    let message = warm
        .insert_message(&a, None, Some(&b), "hi", None)
        .await
        .unwrap();

    assert!(warm.append_read_by(message.id, &b).await.unwrap());
    assert!(!warm.append_read_by(message.id, &b).await.unwrap());

    let stored = warm.get_message(message.id).await.unwrap().unwrap();
    assert_eq!(stored.read_by, vec![b.clone()]);
    assert_eq!(stored.content, "hi");
    assert_eq!(stored.sender_id, a);
}

#[tokio::test]
async fn test_message_metadata_survives_storage() {
    require_postgres!();
    let warm = common::warm().await;
    let (a, b) = (common::unique("ua"), common::unique("ub"));

    let metadata = MessageMetadata::Location {
        lat: 39.6042,
        lon: -105.9538,
    };
    let message = warm
        .insert_message(&a, None, Some(&b), "I'm here", Some(&metadata))
        .await
        .unwrap();

    let stored = warm.get_message(message.id).await.unwrap().unwrap();
    assert_eq!(stored.metadata, Some(metadata));
}

#[tokio::test]
async fn test_recent_messages_covers_both_dm_directions() {
    require_postgres!();
    let warm = common::warm().await;
    let (a, b) = (common::unique("ua"), common::unique("ub"));

    warm.insert_message(&a, None, Some(&b), "one", None)
        .await
        .unwrap();
    warm.insert_message(&b, None, Some(&a), "two", None)
        .await
        .unwrap();
    warm.insert_message(&a, None, Some(&b), "three", None)
        .await
        .unwrap();

    let room = Room::dm(a.clone(), b.clone());
    let recent = warm.recent_messages(&room, 50).await.unwrap();
    let contents: Vec<&str> = recent.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["three", "two", "one"], "newest first");

    let limited = warm.recent_messages(&room, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn test_social_graph_lookups() {
    require_postgres!();
    let warm = common::warm().await;
    let (a, b, c) = (
        common::unique("ua"),
        common::unique("ub"),
        common::unique("uc"),
    );

    common::seed_friendship(&warm, &a, &b, "accepted").await;
    common::seed_friendship(&warm, &c, &a, "pending").await;
    common::seed_user(&warm, &b, "Lindsey").await;

    // Accepted friendships are direction-agnostic; pending ones invisible.
    assert!(warm.are_friends(&a, &b).await.unwrap());
    assert!(warm.are_friends(&b, &a).await.unwrap());
    assert!(!warm.are_friends(&a, &c).await.unwrap());

    let friends = warm.accepted_friend_ids(&a).await.unwrap();
    assert!(friends.contains(&b));
    assert!(!friends.contains(&c));

    assert_eq!(
        warm.display_name(&b).await.unwrap().as_deref(),
        Some("Lindsey")
    );
    assert_eq!(warm.display_name(&c).await.unwrap(), None);

    let group_id = common::unique("g");
    common::seed_group_member(&warm, &group_id, &a).await;
    assert!(warm.is_group_member(&group_id, &a).await.unwrap());
    assert!(!warm.is_group_member(&group_id, &b).await.unwrap());
}
