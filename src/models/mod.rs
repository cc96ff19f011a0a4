// SPDX-License-Identifier: MIT

//! Data models for the application.

pub mod message;
pub mod ping;
pub mod room;
pub mod session;

pub use message::{ChatMessage, MessageMetadata};
pub use ping::PingRecord;
pub use room::Room;
pub use session::{SessionSummary, SkiSession};
