// SPDX-License-Identifier: MIT

//! Location engine flows against live backends (REDIS_URL + DATABASE_URL).
//!
//! Covers the throttle contract, friendship-gated fan-out, and proximity
//! alerts with literal coordinates a few meters apart on a ski slope.

mod common;

use liftline::error::AppError;
use liftline::ws::frames::{LocationPingPayload, SessionEndPayload, SessionStartPayload};
use uuid::Uuid;

fn ping(session_id: Uuid, lat: f64, lon: f64, timestamp: i64) -> LocationPingPayload {
    LocationPingPayload {
        session_id,
        lat,
        lon,
        altitude: 2950.0,
        speed: 10.0,
        accuracy: 4.0,
        heading: None,
        timestamp,
    }
}

#[tokio::test]
async fn test_throttle_second_ping_rejected_without_side_effects() {
    require_redis!();
    require_postgres!();
    let stack = common::stack().await;
    let user = common::unique("ua");
    let (conn, _rx) = common::connect_user(&stack, &user).await;

    let session = stack
        .location
        .start_session(&user, SessionStartPayload { resort_id: None })
        .await
        .unwrap();

    let first = stack
        .location
        .handle_ping(&conn, ping(session.session_id, 39.6042, -105.9538, 1))
        .await;
    assert!(first.is_ok());

    let presence = stack
        .hot
        .hgetall(&liftline::cache::keys::location(&user))
        .await
        .unwrap();
    let stamped = presence.get("timestamp").cloned();

    // Immediately again: throttled, and the hot presence must not move.
    let second = stack
        .location
        .handle_ping(&conn, ping(session.session_id, 39.7, -105.9, 2))
        .await;
    assert!(matches!(second, Err(AppError::Throttled)));

    let presence = stack
        .hot
        .hgetall(&liftline::cache::keys::location(&user))
        .await
        .unwrap();
    assert_eq!(presence.get("timestamp").cloned(), stamped);
    assert_eq!(presence.get("lat").map(String::as_str), Some("39.6042"));
}

#[tokio::test]
async fn test_invalid_coordinates_rejected() {
    require_redis!();
    require_postgres!();
    let stack = common::stack().await;
    let user = common::unique("ua");
    let (conn, _rx) = common::connect_user(&stack, &user).await;

    let session = stack
        .location
        .start_session(&user, SessionStartPayload { resort_id: None })
        .await
        .unwrap();

    let result = stack
        .location
        .handle_ping(&conn, ping(session.session_id, 91.0, -105.9538, 1))
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    // Nothing landed in the hot presence.
    let presence = stack
        .hot
        .hgetall(&liftline::cache::keys::location(&user))
        .await
        .unwrap();
    assert!(presence.is_empty());
}

#[tokio::test]
async fn test_proximity_alert_and_friend_update() {
    require_redis!();
    require_postgres!();
    let stack = common::stack().await;
    let (skier, friend) = (common::unique("ua"), common::unique("ub"));

    common::seed_friendship(&stack.warm, &skier, &friend, "accepted").await;
    common::seed_user(&stack.warm, &skier, "Alex").await;
    common::seed_user(&stack.warm, &friend, "Lindsey").await;

    let (skier_conn, mut skier_rx) = common::connect_user(&stack, &skier).await;
    let (friend_conn, mut friend_rx) = common::connect_user(&stack, &friend).await;
    common::settle().await;

    // The friend is tracked with fresh presence ~6 m from the skier.
    let friend_session = stack
        .location
        .start_session(&friend, SessionStartPayload { resort_id: None })
        .await
        .unwrap();
    stack
        .location
        .handle_ping(
            &friend_conn,
            ping(friend_session.session_id, 39.60425, -105.95385, 1),
        )
        .await
        .unwrap();
    // The friend's own ping has no nearby friends yet; drain nothing.

    let skier_session = stack
        .location
        .start_session(&skier, SessionStartPayload { resort_id: None })
        .await
        .unwrap();
    stack
        .location
        .handle_ping(
            &skier_conn,
            ping(skier_session.session_id, 39.6042, -105.9538, 2),
        )
        .await
        .unwrap();

    // The PINGER gets the proximity alert, with the friend's identity.
    let alert = common::recv_frame(&mut skier_rx)
        .await
        .expect("skier should receive a proximity alert");
    assert_eq!(alert["event"], "location:proximity");
    assert_eq!(alert["data"]["friendId"], friend.as_str());
    assert_eq!(alert["data"]["friendName"], "Lindsey");
    assert!(alert["data"]["distance"].as_f64().unwrap() < 100.0);

    // The friend gets the live location update about the skier.
    let update = common::recv_frame(&mut friend_rx)
        .await
        .expect("friend should receive a location update");
    assert_eq!(update["event"], "location:update");
    assert_eq!(update["data"]["userId"], skier.as_str());
    assert_eq!(update["data"]["displayName"], "Alex");
    assert!(update["data"]["distance"].as_f64().unwrap() < 100.0);
}

#[tokio::test]
async fn test_fan_out_gated_by_friendship() {
    require_redis!();
    require_postgres!();
    let stack = common::stack().await;
    // Same geometry as the proximity test, but NO friendship row.
    let (skier, stranger) = (common::unique("ua"), common::unique("ux"));
    common::seed_user(&stack.warm, &skier, "Alex").await;
    common::seed_user(&stack.warm, &stranger, "Somebody").await;

    let (skier_conn, mut skier_rx) = common::connect_user(&stack, &skier).await;
    let (stranger_conn, mut stranger_rx) = common::connect_user(&stack, &stranger).await;
    common::settle().await;

    let stranger_session = stack
        .location
        .start_session(&stranger, SessionStartPayload { resort_id: None })
        .await
        .unwrap();
    stack
        .location
        .handle_ping(
            &stranger_conn,
            ping(stranger_session.session_id, 39.60425, -105.95385, 1),
        )
        .await
        .unwrap();

    let skier_session = stack
        .location
        .start_session(&skier, SessionStartPayload { resort_id: None })
        .await
        .unwrap();
    stack
        .location
        .handle_ping(
            &skier_conn,
            ping(skier_session.session_id, 39.6042, -105.9538, 2),
        )
        .await
        .unwrap();

    common::settle().await;
    assert!(
        stranger_rx.try_recv().is_err(),
        "stranger must receive no location update"
    );
    assert!(
        skier_rx.try_recv().is_err(),
        "skier must receive no proximity alert"
    );
}

#[tokio::test]
async fn test_session_end_returns_summary_and_clears_presence() {
    require_redis!();
    require_postgres!();
    let stack = common::stack().await;
    let user = common::unique("ua");
    let (conn, _rx) = common::connect_user(&stack, &user).await;

    let started = stack
        .location
        .start_session(
            &user,
            SessionStartPayload {
                resort_id: Some("keystone".to_string()),
            },
        )
        .await
        .unwrap();
    stack
        .location
        .handle_ping(&conn, ping(started.session_id, 39.6042, -105.9538, 1))
        .await
        .unwrap();

    let ended = stack
        .location
        .end_session(
            &user,
            SessionEndPayload {
                session_id: started.session_id,
            },
        )
        .await
        .unwrap();
    assert!(ended.success);
    assert!(ended.summary.duration_seconds >= 0);

    // Presence is gone; the user no longer appears in radius queries.
    let presence = stack
        .hot
        .hgetall(&liftline::cache::keys::location(&user))
        .await
        .unwrap();
    assert!(presence.is_empty());

    // Ending an already-ended session is NotFound.
    let again = stack
        .location
        .end_session(
            &user,
            SessionEndPayload {
                session_id: started.session_id,
            },
        )
        .await;
    assert!(matches!(again, Err(AppError::NotFound(_))));
}
