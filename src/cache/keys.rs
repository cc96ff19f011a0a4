//! Hot-store key and channel formats.
//!
//! Every Redis key the core touches is built here, so the layout stays
//! greppable and no handler invents its own format.

/// Geo set of the latest position per tracked user (member = user id).
pub const GEO_USERS: &str = "geo:users";

/// Hash holding the full latest ping for a user.
pub fn location(user_id: &str) -> String {
    format!("location:{}", user_id)
}

/// Set of connection handles attached to a user across the fleet.
pub fn connections(user_id: &str) -> String {
    format!("connections:{}", user_id)
}

/// List cache of a room's newest messages (head = newest).
pub fn chat_messages(room_id: &str) -> String {
    format!("chat:{}:messages", room_id)
}

/// Typing flag; existence means "user is typing in room".
pub fn typing(room_id: &str, user_id: &str) -> String {
    format!("typing:{}:{}", room_id, user_id)
}

/// Rooms a user has joined (bookkeeping for observability).
pub fn user_rooms(user_id: &str) -> String {
    format!("user:{}:rooms", user_id)
}

/// Members recorded for a room (bookkeeping for observability).
pub fn room_members(room_id: &str) -> String {
    format!("room:{}:members", room_id)
}

/// Friend ids a user declared interest in via `location:subscribe`.
pub fn location_subscriptions(user_id: &str) -> String {
    format!("location:subscriptions:{}", user_id)
}

// --- Pub/sub channels ---

pub const ROOM_CHANNEL_PREFIX: &str = "room:";
pub const USER_CHANNEL_PREFIX: &str = "user:";

/// Bus channel carrying a room's broadcasts.
pub fn room_channel(room_id: &str) -> String {
    format!("{}{}", ROOM_CHANNEL_PREFIX, room_id)
}

/// Bus channel reaching whichever node hosts a user's connections.
pub fn user_channel(user_id: &str) -> String {
    format!("{}{}", USER_CHANNEL_PREFIX, user_id)
}

// --- Job queues ---

/// Pending jobs for a topic (LPUSH to enqueue, RPOP to consume).
pub fn job_queue(topic: &str) -> String {
    format!("jobs:{}", topic)
}

/// Jobs that exhausted their retries.
pub fn job_dead_letter(topic: &str) -> String {
    format!("jobs:{}:dead", topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_formats() {
        assert_eq!(location("ua-1"), "location:ua-1");
        assert_eq!(connections("ua-1"), "connections:ua-1");
        assert_eq!(chat_messages("dm:ua-1_ub-2"), "chat:dm:ua-1_ub-2:messages");
        assert_eq!(typing("group:g1", "ua-1"), "typing:group:g1:ua-1");
        assert_eq!(room_channel("group:g1"), "room:group:g1");
        assert_eq!(user_channel("ua-1"), "user:ua-1");
        assert_eq!(job_queue("location-pings"), "jobs:location-pings");
        assert_eq!(job_dead_letter("location-pings"), "jobs:location-pings:dead");
    }
}
