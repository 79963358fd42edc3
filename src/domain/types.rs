//! Shared types for the occupancy engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw device-count reading as appended by the ingestion listener.
///
/// Immutable once written; the journal and the in-memory store both treat
/// these as append-only rows ordered by (location, timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub location: String,
    pub count: u32,
    pub timestamp: DateTime<Utc>,
}

/// A smoothed reading derived from one location's raw series.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedReading {
    pub timestamp: DateTime<Utc>,
    pub smoothed_count: f64,
}

/// Short-horizon direction of a location's smoothed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Trend {
    Increasing,
    Steady,
    Decreasing,
}

/// One scored point of today's intraday series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub busyness_percentage: Option<f64>,
}

/// Per-location status served to API consumers.
///
/// Built fresh on each cache miss, never mutated after construction.
/// `timestamp` is the time of the latest smoothed reading; `today_data`
/// covers local-midnight-to-now in ascending order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationStatus {
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub busyness_percentage: Option<f64>,
    pub vs_typical_percentage: Option<f64>,
    pub trend: Option<Trend>,
    pub today_data: Vec<DataPoint>,
}

/// JSON form of a count event for sources that attach their own timestamp.
///
/// Plain-integer payloads are the common case; this variant exists for
/// backfills and sensors with an onboard clock.
#[derive(Debug, Deserialize)]
pub struct CountPayload {
    pub count: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}
