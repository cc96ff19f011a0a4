// SPDX-License-Identifier: MIT

//! Realtime transport: wire frames, connection registry, cross-node
//! backplane, and the WebSocket gateway itself.

pub mod backplane;
pub mod frames;
pub mod gateway;
pub mod registry;

pub use backplane::{Backplane, BackplaneListener};
pub use registry::{Connection, ConnectionRegistry};
