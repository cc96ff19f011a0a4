//! Hot-store layer: typed client plus the key layout.

pub mod hot;
pub mod keys;

pub use hot::{GeoMember, HotCache};
