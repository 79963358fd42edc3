//! Status builder - turns the latest readings plus the statistics tables into
//! the served per-location status
//!
//! Invoked synchronously on a cache miss. Covers every location with at least
//! one smoothed reading in the last 24 hours; a location whose statistics are
//! incomplete (no baseline, no ceiling, non-positive ceiling) gets absent
//! derived fields rather than failing the whole response. An entirely empty
//! result is a distinct no-data condition, not an empty list: callers must be
//! able to tell "not warmed up" from "nothing open".

use crate::domain::{DataPoint, LocationStatus, Trend};
use crate::services::stats::{day_of_week, time_bucket, StatsTables};
use crate::services::store::{rows_from, ReadingStore};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// Storage holds no reading newer than 24 hours for any location.
    #[error("no data available")]
    NoData,
}

#[derive(Debug, Clone)]
pub struct StatusConfig {
    /// Trend compares the latest reading against the one this many rows
    /// earlier - rows, not minutes, so spacing follows the sampling rate.
    pub trend_lookback_rows: usize,
    pub trend_threshold: f64,
    pub time_bucket_minutes: u32,
}

/// Busyness of one smoothed count against a location's floor and ceiling.
///
/// Absent when either statistic is missing or the ceiling is non-positive.
pub fn busyness(count: f64, baseline: Option<f64>, adjusted_max: Option<f64>) -> Option<f64> {
    let (baseline, adjusted_max) = (baseline?, adjusted_max?);
    if adjusted_max <= 0.0 {
        return None;
    }
    Some((((count - baseline) / adjusted_max) * 100.0).clamp(0.0, 100.0))
}

pub struct StatusBuilder {
    store: Arc<ReadingStore>,
    tables: Arc<StatsTables>,
    config: StatusConfig,
}

impl StatusBuilder {
    pub fn new(store: Arc<ReadingStore>, tables: Arc<StatsTables>, config: StatusConfig) -> Self {
        Self { store, tables, config }
    }

    /// Build the full status list, ordered by location name.
    pub fn build<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Result<Vec<LocationStatus>, StatusError> {
        let tz = now.timezone();
        let recent_cutoff = (now.clone() - Duration::days(1)).with_timezone(&Utc);
        // On a DST-gap day local midnight may not exist; an empty today-series
        // beats a panic there
        let midnight = tz
            .from_local_datetime(&now.date_naive().and_time(NaiveTime::MIN))
            .earliest()
            .unwrap_or_else(|| now.clone())
            .with_timezone(&Utc);

        let mut results: Vec<LocationStatus> = Vec::new();
        self.store.scan(|location, rows| {
            let recent = rows_from(rows, recent_cutoff);
            let Some(latest) = recent.last() else {
                return;
            };

            let baseline = self.tables.baseline(location);
            let adjusted_max = self.tables.adjusted_max(location);
            let busyness_percentage = busyness(latest.smoothed_count, baseline, adjusted_max);

            let typical = self.tables.time_average(
                location,
                day_of_week(latest.timestamp, &tz),
                time_bucket(latest.timestamp, &tz, self.config.time_bucket_minutes),
            );
            let vs_typical_percentage = typical
                .filter(|t| *t > 0.0)
                .map(|t| ((latest.smoothed_count - t) / t) * 100.0);

            let past = (recent.len() > self.config.trend_lookback_rows)
                .then(|| recent[recent.len() - 1 - self.config.trend_lookback_rows].smoothed_count);
            let trend = past.filter(|p| *p > 0.0).map(|p| {
                let change_ratio = (latest.smoothed_count - p) / p;
                if change_ratio > self.config.trend_threshold {
                    Trend::Increasing
                } else if change_ratio < -self.config.trend_threshold {
                    Trend::Decreasing
                } else {
                    Trend::Steady
                }
            });

            // Every reading since local midnight, scored against the
            // location's current floor/ceiling (not each reading's own)
            let today_data = rows_from(recent, midnight)
                .iter()
                .map(|row| DataPoint {
                    timestamp: row.timestamp,
                    busyness_percentage: busyness(row.smoothed_count, baseline, adjusted_max),
                })
                .collect();

            results.push(LocationStatus {
                location: location.to_string(),
                timestamp: latest.timestamp,
                busyness_percentage,
                vs_typical_percentage,
                trend,
                today_data,
            });
        });

        if results.is_empty() {
            return Err(StatusError::NoData);
        }
        results.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RawReading;
    use crate::services::smoothing::Smoothing;
    use crate::services::stats::{Aggregator, AggregatorConfig};
    use chrono::TimeZone;

    fn config() -> StatusConfig {
        StatusConfig { trend_lookback_rows: 5, trend_threshold: 0.07, time_bucket_minutes: 10 }
    }

    fn identity_store() -> Arc<ReadingStore> {
        Arc::new(ReadingStore::new(Smoothing::Window { size: 1 }))
    }

    fn append(store: &ReadingStore, location: &str, count: u32, timestamp: DateTime<Utc>) {
        assert!(store.append(&RawReading { location: location.to_string(), count, timestamp }));
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 20, 12, 0, 0).unwrap()
    }

    fn aggregate(store: &Arc<ReadingStore>, tables: &Arc<StatsTables>, now: DateTime<Utc>) {
        let aggregator = Aggregator::new(
            store.clone(),
            tables.clone(),
            AggregatorConfig {
                lookback_days: 45,
                max_percentile: 0.99,
                closed_threshold: 1.5,
                time_bucket_minutes: 10,
            },
        );
        aggregator.run_once(now).unwrap();
    }

    #[test]
    fn test_busyness_formula_and_clamp() {
        assert_eq!(busyness(35.0, Some(10.0), Some(50.0)), Some(50.0));
        assert_eq!(busyness(500.0, Some(10.0), Some(50.0)), Some(100.0));
        assert_eq!(busyness(2.0, Some(10.0), Some(50.0)), Some(0.0));
        assert_eq!(busyness(35.0, None, Some(50.0)), None);
        assert_eq!(busyness(35.0, Some(10.0), None), None);
        assert_eq!(busyness(35.0, Some(10.0), Some(0.0)), None);
        assert_eq!(busyness(35.0, Some(10.0), Some(-4.0)), None);
    }

    #[test]
    fn test_scenario_baseline_ten_ceiling_fifty() {
        let store = identity_store();
        // Historical peak of 60 two days back: in the lookback window but not
        // in the 24h status window
        append(&store, "Hall A", 60, Utc.with_ymd_and_hms(2025, 11, 18, 12, 0, 0).unwrap());
        // Overnight floor of 10
        for hour in [1, 2, 3] {
            append(&store, "Hall A", 10, Utc.with_ymd_and_hms(2025, 11, 20, hour, 30, 0).unwrap());
        }
        append(&store, "Hall A", 35, Utc.with_ymd_and_hms(2025, 11, 20, 11, 58, 0).unwrap());

        let tables = Arc::new(StatsTables::new());
        aggregate(&store, &tables, noon());
        assert_eq!(tables.baseline("Hall A"), Some(10.0));
        assert_eq!(tables.adjusted_max("Hall A"), Some(50.0));

        let builder = StatusBuilder::new(store, tables, config());
        let statuses = builder.build(noon()).unwrap();
        assert_eq!(statuses.len(), 1);

        let status = &statuses[0];
        assert_eq!(status.location, "Hall A");
        assert_eq!(status.busyness_percentage, Some(50.0));
        assert_eq!(status.timestamp, Utc.with_ymd_and_hms(2025, 11, 20, 11, 58, 0).unwrap());
        // Only 4 readings in the last 24h: below the 6 needed for a trend
        assert_eq!(status.trend, None);
        // Overnight readings plus the latest, all since local midnight
        assert_eq!(status.today_data.len(), 4);
        assert_eq!(status.today_data[0].busyness_percentage, Some(0.0));
        assert!(status.today_data.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    fn trend_of(counts: &[u32]) -> Option<Trend> {
        let store = identity_store();
        for (i, &count) in counts.iter().enumerate() {
            append(&store, "Hall A", count, Utc.with_ymd_and_hms(2025, 11, 20, 11, i as u32, 0).unwrap());
        }
        let builder = StatusBuilder::new(store, Arc::new(StatsTables::new()), config());
        builder.build(noon()).unwrap()[0].trend
    }

    #[test]
    fn test_trend_thresholds_are_strict() {
        // past is 5 rows before the latest; ratio exactly 0.07 stays Steady
        assert_eq!(trend_of(&[100, 1, 1, 1, 1, 107]), Some(Trend::Steady));
        assert_eq!(trend_of(&[100, 1, 1, 1, 1, 108]), Some(Trend::Increasing));
        assert_eq!(trend_of(&[100, 1, 1, 1, 1, 92]), Some(Trend::Decreasing));
        // Zero past reading yields no trend
        assert_eq!(trend_of(&[0, 1, 1, 1, 1, 50]), None);
        // Too few rows
        assert_eq!(trend_of(&[100, 1, 1, 1, 107]), None);
    }

    #[test]
    fn test_vs_typical_against_same_weekday_bucket() {
        let store = identity_store();
        // Previous Thursday, same 12:40 bucket
        append(&store, "Hall A", 45, Utc.with_ymd_and_hms(2025, 11, 13, 12, 41, 0).unwrap());
        for hour in [1, 2, 3] {
            append(&store, "Hall A", 10, Utc.with_ymd_and_hms(2025, 11, 20, hour, 30, 0).unwrap());
        }
        append(&store, "Hall A", 35, Utc.with_ymd_and_hms(2025, 11, 20, 12, 43, 0).unwrap());

        let now = Utc.with_ymd_and_hms(2025, 11, 20, 12, 45, 0).unwrap();
        let tables = Arc::new(StatsTables::new());
        aggregate(&store, &tables, now);
        // Both open readings share (Thursday, bucket 760): typical is 40
        assert_eq!(tables.time_average("Hall A", 4, 760), Some(40.0));

        let builder = StatusBuilder::new(store, tables, config());
        let status = &builder.build(now).unwrap()[0];
        assert_eq!(status.vs_typical_percentage, Some(-12.5));
    }

    #[test]
    fn test_missing_statistics_leave_fields_absent_not_failing() {
        let store = identity_store();
        append(&store, "Hall A", 35, Utc.with_ymd_and_hms(2025, 11, 20, 11, 0, 0).unwrap());

        let builder = StatusBuilder::new(store, Arc::new(StatsTables::new()), config());
        let statuses = builder.build(noon()).unwrap();
        let status = &statuses[0];
        assert_eq!(status.busyness_percentage, None);
        assert_eq!(status.vs_typical_percentage, None);
        assert_eq!(status.trend, None);
        assert_eq!(status.today_data[0].busyness_percentage, None);
    }

    #[test]
    fn test_no_data_when_store_is_empty() {
        let builder = StatusBuilder::new(identity_store(), Arc::new(StatsTables::new()), config());
        assert_eq!(builder.build(noon()), Err(StatusError::NoData));
    }

    #[test]
    fn test_no_data_when_all_readings_are_stale() {
        let store = identity_store();
        append(&store, "Hall A", 35, Utc.with_ymd_and_hms(2025, 11, 10, 11, 0, 0).unwrap());

        let builder = StatusBuilder::new(store, Arc::new(StatsTables::new()), config());
        assert_eq!(builder.build(noon()), Err(StatusError::NoData));
    }

    #[test]
    fn test_results_sorted_by_location() {
        let store = identity_store();
        append(&store, "Hall C", 1, Utc.with_ymd_and_hms(2025, 11, 20, 11, 0, 0).unwrap());
        append(&store, "Hall A", 2, Utc.with_ymd_and_hms(2025, 11, 20, 11, 0, 0).unwrap());
        append(&store, "Hall B", 3, Utc.with_ymd_and_hms(2025, 11, 20, 11, 0, 0).unwrap());

        let builder = StatusBuilder::new(store, Arc::new(StatsTables::new()), config());
        let names: Vec<String> =
            builder.build(noon()).unwrap().into_iter().map(|s| s.location).collect();
        assert_eq!(names, vec!["Hall A", "Hall B", "Hall C"]);
    }

    #[test]
    fn test_today_series_starts_at_local_midnight() {
        let store = identity_store();
        // 23:30 yesterday is inside the 24h window but before local midnight
        append(&store, "Hall A", 5, Utc.with_ymd_and_hms(2025, 11, 19, 23, 30, 0).unwrap());
        append(&store, "Hall A", 7, Utc.with_ymd_and_hms(2025, 11, 20, 0, 10, 0).unwrap());
        append(&store, "Hall A", 9, Utc.with_ymd_and_hms(2025, 11, 20, 8, 0, 0).unwrap());

        let builder = StatusBuilder::new(store, Arc::new(StatsTables::new()), config());
        let status = &builder.build(noon()).unwrap()[0];
        assert_eq!(status.today_data.len(), 2);
        assert_eq!(status.today_data[0].timestamp, Utc.with_ymd_and_hms(2025, 11, 20, 0, 10, 0).unwrap());
    }
}
