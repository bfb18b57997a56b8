//! Departure-time traffic model.
//!
//! The OSRM backend reports free-flow durations only. A [`TrafficProfile`]
//! scales them by time of day to get a traffic-aware estimate, and the
//! ratio between the two picks the [`TrafficCondition`].

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrafficCondition {
    Light,
    Moderate,
    Heavy,
    /// No provider data (fallback path).
    Unknown,
}

impl TrafficCondition {
    pub fn from_ratio(in_traffic_over_nominal: f64) -> Self {
        if !in_traffic_over_nominal.is_finite() {
            TrafficCondition::Unknown
        } else if in_traffic_over_nominal < 1.15 {
            TrafficCondition::Light
        } else if in_traffic_over_nominal < 1.4 {
            TrafficCondition::Moderate
        } else {
            TrafficCondition::Heavy
        }
    }

    pub fn classify(nominal_secs: i32, in_traffic_secs: i32) -> Self {
        if nominal_secs <= 0 {
            return TrafficCondition::Light;
        }
        Self::from_ratio(in_traffic_secs as f64 / nominal_secs as f64)
    }
}

/// A recurring congestion window, minutes from local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakWindow {
    pub start_minute: u32,
    pub end_minute: u32,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficProfile {
    pub peaks: Vec<PeakWindow>,
    pub off_peak_multiplier: f64,
    /// Offset of the operating region's local time from UTC.
    pub utc_offset_minutes: i32,
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self {
            peaks: vec![
                PeakWindow { start_minute: 7 * 60, end_minute: 9 * 60 + 30, multiplier: 1.35 },
                PeakWindow { start_minute: 11 * 60 + 30, end_minute: 13 * 60 + 30, multiplier: 1.15 },
                PeakWindow { start_minute: 16 * 60, end_minute: 18 * 60 + 30, multiplier: 1.45 },
            ],
            off_peak_multiplier: 1.0,
            utc_offset_minutes: 0,
        }
    }
}

impl TrafficProfile {
    /// A profile with no congestion at any time.
    pub fn free_flow() -> Self {
        Self {
            peaks: Vec::new(),
            off_peak_multiplier: 1.0,
            utc_offset_minutes: 0,
        }
    }

    pub fn multiplier_at(&self, departure: DateTime<Utc>) -> f64 {
        let local = departure + Duration::minutes(self.utc_offset_minutes as i64);
        let minute = local.hour() * 60 + local.minute();
        self.peaks
            .iter()
            .find(|peak| minute >= peak.start_minute && minute < peak.end_minute)
            .map(|peak| peak.multiplier)
            .unwrap_or(self.off_peak_multiplier)
    }

    pub fn in_traffic_secs(&self, nominal_secs: i32, departure: DateTime<Utc>) -> i32 {
        (nominal_secs as f64 * self.multiplier_at(departure)).round() as i32
    }
}
