//! In-memory reading store with a materialized smoothing view
//!
//! One append-only, chronologically ordered row vector per location. Each row
//! carries the raw count plus its smoothed value, materialized at append time
//! by folding the location's `SmootherState`. Because both smoothing modes are
//! incremental folds over an append-only series, the materialized column is
//! always equal to a fresh recomputation over the raw data.
//!
//! Readers take the read lock and work on slices; the only writer is the
//! ingestion path (plus journal replay at startup).

use crate::domain::{RawReading, SmoothedReading};
use crate::services::smoothing::{Smoothing, SmootherState};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::warn;

/// One stored row: raw count plus its materialized smoothed value.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredReading {
    pub timestamp: DateTime<Utc>,
    pub count: u32,
    pub smoothed_count: f64,
}

struct LocationSeries {
    rows: Vec<StoredReading>,
    smoother: SmootherState,
}

/// Append-only store of per-location reading series.
pub struct ReadingStore {
    smoothing: Smoothing,
    inner: RwLock<FxHashMap<String, LocationSeries>>,
}

impl ReadingStore {
    pub fn new(smoothing: Smoothing) -> Self {
        Self { smoothing, inner: RwLock::new(FxHashMap::default()) }
    }

    /// Append one raw reading, materializing its smoothed value.
    ///
    /// Returns false (and stores nothing) if the reading is older than its
    /// location's newest row - series must stay ordered by timestamp.
    pub fn append(&self, reading: &RawReading) -> bool {
        let mut inner = self.inner.write();
        let series = inner
            .entry(reading.location.clone())
            .or_insert_with(|| LocationSeries { rows: Vec::new(), smoother: self.smoothing.new_state() });

        if let Some(last) = series.rows.last() {
            if reading.timestamp < last.timestamp {
                warn!(
                    location = %reading.location,
                    timestamp = %reading.timestamp,
                    newest = %last.timestamp,
                    "reading_out_of_order"
                );
                return false;
            }
        }

        let smoothed_count = series.smoother.push(reading.count);
        series.rows.push(StoredReading {
            timestamp: reading.timestamp,
            count: reading.count,
            smoothed_count,
        });
        true
    }

    /// Visit every location's full ordered series under the read lock.
    pub fn scan(&self, mut f: impl FnMut(&str, &[StoredReading])) {
        let inner = self.inner.read();
        for (location, series) in inner.iter() {
            f(location, &series.rows);
        }
    }

    /// One location's smoothed series from `cutoff` (inclusive) onward.
    pub fn smoothed_since(&self, location: &str, cutoff: DateTime<Utc>) -> Vec<SmoothedReading> {
        let inner = self.inner.read();
        let Some(series) = inner.get(location) else {
            return Vec::new();
        };
        rows_from(&series.rows, cutoff)
            .iter()
            .map(|row| SmoothedReading { timestamp: row.timestamp, smoothed_count: row.smoothed_count })
            .collect()
    }

    /// Most recent smoothed reading per location, across all locations.
    pub fn latest_per_location(&self) -> Vec<(String, SmoothedReading)> {
        let inner = self.inner.read();
        let mut latest: Vec<(String, SmoothedReading)> = inner
            .iter()
            .filter_map(|(location, series)| {
                series.rows.last().map(|row| {
                    (
                        location.clone(),
                        SmoothedReading { timestamp: row.timestamp, smoothed_count: row.smoothed_count },
                    )
                })
            })
            .collect();
        latest.sort_by(|a, b| a.0.cmp(&b.0));
        latest
    }

    pub fn location_count(&self) -> usize {
        self.inner.read().len()
    }

    pub fn reading_count(&self) -> usize {
        self.inner.read().values().map(|series| series.rows.len()).sum()
    }
}

/// Rows with `timestamp > cutoff` (the aggregator's window predicate).
pub fn rows_after(rows: &[StoredReading], cutoff: DateTime<Utc>) -> &[StoredReading] {
    let start = rows.partition_point(|row| row.timestamp <= cutoff);
    &rows[start..]
}

/// Rows with `timestamp >= cutoff` (the status builder's window predicate).
pub fn rows_from(rows: &[StoredReading], cutoff: DateTime<Utc>) -> &[StoredReading] {
    let start = rows.partition_point(|row| row.timestamp < cutoff);
    &rows[start..]
}
