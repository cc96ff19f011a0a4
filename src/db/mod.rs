//! Durable-store layer (PostgreSQL with PostGIS).

pub mod postgres;

pub use postgres::{SessionDelta, WarmDb};

/// Table names as constants. The core owns the first three; the rest are
/// read-only lookups against the seeded schema.
pub mod tables {
    pub const SKI_SESSIONS: &str = "ski_sessions";
    pub const LOCATION_PINGS: &str = "location_pings";
    pub const MESSAGES: &str = "messages";
    pub const FRIENDSHIPS: &str = "friendships";
    pub const GROUP_MEMBERS: &str = "group_members";
    pub const USERS: &str = "users";
}
