// SPDX-License-Identifier: MIT

//! Liftline: the realtime core of a social ski-tracking service.
//!
//! One process per node, deployed as a fleet of identical stateless nodes
//! behind sticky WebSocket routing. Ephemeral state (presence, hot caches,
//! typing flags) lives in the shared hot store, which also provides the
//! pub/sub backplane; durable state lives in PostgreSQL. The crate hosts
//! the WebSocket gateway, the live location engine with friend-proximity
//! fan-out, the chat fabric, and the background ping persister.

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;
pub mod ws;

use std::sync::Arc;
use std::time::Instant;

use auth::TokenVerifier;
use cache::HotCache;
use config::Config;
use db::WarmDb;
use services::{ChatEngine, JobQueue, LocationEngine};
use ws::{Backplane, ConnectionRegistry};

/// Shared application state. Configured once at process start and passed
/// explicitly; nothing in here is a global.
pub struct AppState {
    pub config: Config,
    pub hot: HotCache,
    pub warm: WarmDb,
    pub verifier: Arc<dyn TokenVerifier>,
    pub registry: Arc<ConnectionRegistry>,
    pub backplane: Arc<Backplane>,
    pub jobs: JobQueue,
    pub location: Arc<LocationEngine>,
    pub chat: Arc<ChatEngine>,
    pub started_at: Instant,
}
