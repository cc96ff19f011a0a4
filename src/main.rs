// SPDX-License-Identifier: MIT

//! Liftline node entry point.
//!
//! Boot order: logging, config, hot store, durable store, backplane
//! listener, background workers, then the HTTP/WebSocket listener. Any
//! failure before the listener binds is fatal; after that, failures are
//! per-call and the node keeps serving.

use std::sync::Arc;
use std::time::Instant;

use liftline::{
    auth::JwtVerifier,
    cache::HotCache,
    config::Config,
    db::WarmDb,
    services::{jobs, ChatEngine, JobQueue, LocationEngine, PingPersister},
    ws::{Backplane, ConnectionRegistry},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(port = config.port, "Starting Liftline realtime core");

    let hot = HotCache::connect(&config)
        .await
        .expect("Failed to connect to hot store");
    let warm = WarmDb::connect(&config)
        .await
        .expect("Failed to connect to durable store");

    let registry = Arc::new(ConnectionRegistry::new(hot.clone()));
    let (backplane, listener) = Backplane::new(hot.clone());
    tokio::spawn(listener.run(registry.clone()));

    let queue = JobQueue::new(hot.clone());
    tokio::spawn(PingPersister::new(warm.clone(), queue.clone(), &config).run());
    tokio::spawn(jobs::run_after_write_worker(queue.clone()));

    let verifier = Arc::new(JwtVerifier::new(&config.jwt_signing_key));

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
        queue.clone(),
        backplane.clone(),
        registry.clone(),
        &config,
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        hot,
        warm,
        verifier,
        registry,
        backplane,
        jobs: queue,
        location,
        chat,
        started_at: Instant::now(),
    });

    let app = liftline::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let tcp = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(tcp, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("liftline=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
