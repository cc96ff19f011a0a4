//! Location ping payloads: validated on ingest, append-only once persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single accepted GPS sample, as carried by the persistence job queue and
/// written to `location_pings`. `user_id` is denormalized from the
/// connection (never trusted from the client payload) for query speed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRecord {
    pub session_id: Uuid,
    pub user_id: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
    pub speed_mps: f64,
    pub accuracy_m: f64,
    pub heading_deg: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl PingRecord {
    /// Validate coordinate ranges and sensor sanity. Returns the first
    /// problem found; the ping is rejected wholesale on any failure.
    pub fn validate(&self) -> Result<(), String> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("latitude {} out of range", self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(format!("longitude {} out of range", self.lon));
        }
        if self.speed_mps < 0.0 || !self.speed_mps.is_finite() {
            return Err(format!("speed {} invalid", self.speed_mps));
        }
        if self.accuracy_m < 0.0 || !self.accuracy_m.is_finite() {
            return Err(format!("accuracy {} invalid", self.accuracy_m));
        }
        if let Some(heading) = self.heading_deg {
            if !(0.0..360.0).contains(&heading) {
                return Err(format!("heading {} out of [0,360)", heading));
            }
        }
        if !self.lat.is_finite() || !self.lon.is_finite() || !self.altitude_m.is_finite() {
            return Err("non-finite coordinate".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_ping() -> PingRecord {
        PingRecord {
            session_id: Uuid::new_v4(),
            user_id: "ua-1".to_string(),
            lat: 39.6042,
            lon: -105.9538,
            altitude_m: 2900.0,
            speed_mps: 12.5,
            accuracy_m: 4.0,
            heading_deg: Some(180.0),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_ping_passes() {
        assert!(valid_ping().validate().is_ok());
    }

    #[test]
    fn test_latitude_bounds() {
        let mut p = valid_ping();
        p.lat = 90.0;
        assert!(p.validate().is_ok());
        p.lat = 90.0001;
        assert!(p.validate().is_err());
        p.lat = -91.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_longitude_bounds() {
        let mut p = valid_ping();
        p.lon = -180.0;
        assert!(p.validate().is_ok());
        p.lon = 180.5;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_negative_speed_and_accuracy_rejected() {
        let mut p = valid_ping();
        p.speed_mps = -0.1;
        assert!(p.validate().is_err());

        let mut p = valid_ping();
        p.accuracy_m = -1.0;
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_heading_half_open_interval() {
        let mut p = valid_ping();
        p.heading_deg = Some(0.0);
        assert!(p.validate().is_ok());
        p.heading_deg = Some(359.99);
        assert!(p.validate().is_ok());
        p.heading_deg = Some(360.0);
        assert!(p.validate().is_err());
        p.heading_deg = None;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut p = valid_ping();
        p.altitude_m = f64::NAN;
        assert!(p.validate().is_err());
    }
}
