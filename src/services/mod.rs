// SPDX-License-Identifier: MIT

//! Services module - business logic layer.

pub mod chat;
pub mod jobs;
pub mod location;
pub mod persister;

pub use chat::ChatEngine;
pub use jobs::JobQueue;
pub use location::LocationEngine;
pub use persister::PingPersister;
