//! Statistics aggregator - periodic recomputation of per-location baselines,
//! percentile ceilings, and time-of-day averages
//!
//! Three tables, recomputed on a fixed cadence from the smoothing view:
//! - `baseline` - mean smoothed count over last night's 1-4am readings, the
//!   location's unoccupied floor
//! - `adjusted_max` - the 99th-percentile smoothed count among "open" readings
//!   in the trailing lookback window, minus the baseline
//! - `time_averages` - mean smoothed count per (location, weekday, time
//!   bucket) among the same open readings, for the "vs typical" stat
//!
//! All three updates are replace-by-key upserts: a location without fresh
//! overnight data keeps its row from the last run that covered it, and readers
//! never observe an empty table mid-run. A reading is "open" when its smoothed
//! count exceeds the location's baseline times the closed threshold; long
//! closed stretches near zero would otherwise drag down the ceiling and the
//! circadian means.

use crate::infra::metrics::Metrics;
use crate::services::store::{rows_after, ReadingStore};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Key of one time-averages row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeSlot {
    pub location: String,
    /// 0 = Sunday through 6 = Saturday. Join key against request-time
    /// computations; the convention must not drift.
    pub day_of_week: u8,
    /// Minutes since local midnight, floored to the bucket size.
    pub time_bucket: u16,
}

/// The three statistics tables, shared between the aggregator and the status
/// builder. Each map is replaced key-by-key on recomputation.
#[derive(Default)]
pub struct StatsTables {
    baseline: RwLock<FxHashMap<String, f64>>,
    adjusted_max: RwLock<FxHashMap<String, f64>>,
    time_averages: RwLock<FxHashMap<TimeSlot, f64>>,
}

impl StatsTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self, location: &str) -> Option<f64> {
        self.baseline.read().get(location).copied()
    }

    pub fn adjusted_max(&self, location: &str) -> Option<f64> {
        self.adjusted_max.read().get(location).copied()
    }

    pub fn time_average(&self, location: &str, day_of_week: u8, time_bucket: u16) -> Option<f64> {
        let slot = TimeSlot { location: location.to_string(), day_of_week, time_bucket };
        self.time_averages.read().get(&slot).copied()
    }

    /// Snapshot of the baseline table, including rows carried over from
    /// earlier runs. The open-state filter joins against this.
    fn baseline_view(&self) -> FxHashMap<String, f64> {
        self.baseline.read().clone()
    }

    fn upsert_baselines(&self, rows: FxHashMap<String, f64>) {
        self.baseline.write().extend(rows);
    }

    fn upsert_adjusted_max(&self, rows: FxHashMap<String, f64>) {
        self.adjusted_max.write().extend(rows);
    }

    fn upsert_time_averages(&self, rows: FxHashMap<TimeSlot, f64>) {
        self.time_averages.write().extend(rows);
    }
}

/// Local weekday of a stored timestamp, 0 = Sunday.
pub fn day_of_week<Tz: TimeZone>(timestamp: DateTime<Utc>, tz: &Tz) -> u8 {
    timestamp.with_timezone(tz).weekday().num_days_from_sunday() as u8
}

/// Minutes since local midnight, floored to the bucket size.
pub fn time_bucket<Tz: TimeZone>(timestamp: DateTime<Utc>, tz: &Tz, bucket_minutes: u32) -> u16 {
    let local = timestamp.with_timezone(tz);
    let bucket_minutes = bucket_minutes.max(1);
    (local.hour() * 60 + (local.minute() / bucket_minutes) * bucket_minutes) as u16
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub lookback_days: i64,
    pub max_percentile: f64,
    pub closed_threshold: f64,
    pub time_bucket_minutes: u32,
}

/// Counts of rows produced by one aggregation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub baselines: usize,
    pub max_counts: usize,
    pub time_buckets: usize,
}

/// Periodically recomputes the statistics tables from the reading store.
pub struct Aggregator {
    store: Arc<ReadingStore>,
    tables: Arc<StatsTables>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(store: Arc<ReadingStore>, tables: Arc<StatsTables>, config: AggregatorConfig) -> Self {
        Self { store, tables, config }
    }

    /// One full recomputation. Idempotent: a second run over unchanged data
    /// produces identical tables. The three steps are sequential because the
    /// open-state filter depends on the freshly upserted baselines.
    pub fn run_once<Tz: TimeZone>(&self, now: DateTime<Tz>) -> anyhow::Result<RunSummary> {
        let baselines = self.compute_baselines(&now);
        let baseline_count = baselines.len();
        self.tables.upsert_baselines(baselines);

        let baseline_view = self.tables.baseline_view();

        let max_rows = self.compute_adjusted_max(&now, &baseline_view);
        let max_count = max_rows.len();
        self.tables.upsert_adjusted_max(max_rows);

        let average_rows = self.compute_time_averages(&now, &baseline_view);
        let bucket_count = average_rows.len();
        self.tables.upsert_time_averages(average_rows);

        Ok(RunSummary { baselines: baseline_count, max_counts: max_count, time_buckets: bucket_count })
    }

    /// Mean smoothed count among last-24h readings with local hour in 1-3.
    /// Locations without such readings are omitted; their prior rows survive.
    fn compute_baselines<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> FxHashMap<String, f64> {
        let cutoff = (now.clone() - Duration::days(1)).with_timezone(&Utc);
        let tz = now.timezone();

        let mut result = FxHashMap::default();
        self.store.scan(|location, rows| {
            let mut sum = 0.0;
            let mut n = 0usize;
            for row in rows_after(rows, cutoff) {
                let hour = row.timestamp.with_timezone(&tz).hour();
                if (1..=3).contains(&hour) {
                    sum += row.smoothed_count;
                    n += 1;
                }
            }
            if n > 0 {
                result.insert(location.to_string(), sum / n as f64);
            }
        });
        result
    }

    /// Baseline-adjusted value at the configured percentile, taken from the
    /// top of the descending open-reading distribution: rank
    /// `floor(n × (1 − P)) + 1`. The exact rank formula is a compatibility
    /// contract; boundary behavior is covered by tests.
    fn compute_adjusted_max<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        baselines: &FxHashMap<String, f64>,
    ) -> FxHashMap<String, f64> {
        let cutoff = (now.clone() - Duration::days(self.config.lookback_days)).with_timezone(&Utc);

        let mut result = FxHashMap::default();
        self.store.scan(|location, rows| {
            let Some(&baseline) = baselines.get(location) else {
                return;
            };
            let floor = baseline * self.config.closed_threshold;
            let mut open: Vec<f64> = rows_after(rows, cutoff)
                .iter()
                .filter(|row| row.smoothed_count > floor)
                .map(|row| row.smoothed_count)
                .collect();
            if open.is_empty() {
                return;
            }

            open.sort_unstable_by(|a, b| b.total_cmp(a));
            let rank = (open.len() as f64 * (1.0 - self.config.max_percentile)).floor() as usize + 1;
            let value = open[rank.min(open.len()) - 1];
            // May be negative on noisy data; the status builder treats a
            // non-positive ceiling as "no usable ceiling"
            result.insert(location.to_string(), value - baseline);
        });
        result
    }

    /// Mean smoothed count of open in-window readings per (location, weekday,
    /// bucket).
    fn compute_time_averages<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        baselines: &FxHashMap<String, f64>,
    ) -> FxHashMap<TimeSlot, f64> {
        let cutoff = (now.clone() - Duration::days(self.config.lookback_days)).with_timezone(&Utc);
        let tz = now.timezone();

        let mut sums: FxHashMap<TimeSlot, (f64, usize)> = FxHashMap::default();
        self.store.scan(|location, rows| {
            let Some(&baseline) = baselines.get(location) else {
                return;
            };
            let floor = baseline * self.config.closed_threshold;
            for row in rows_after(rows, cutoff) {
                if row.smoothed_count <= floor {
                    continue;
                }
                let slot = TimeSlot {
                    location: location.to_string(),
                    day_of_week: day_of_week(row.timestamp, &tz),
                    time_bucket: time_bucket(row.timestamp, &tz, self.config.time_bucket_minutes),
                };
                let entry = sums.entry(slot).or_insert((0.0, 0));
                entry.0 += row.smoothed_count;
                entry.1 += 1;
            }
        });

        sums.into_iter().map(|(slot, (sum, n))| (slot, sum / n as f64)).collect()
    }
}

/// Run the aggregator on a fixed cadence until shutdown.
///
/// The first tick fires immediately so statistics are available right after
/// startup. Runs are sequential on one task: a slow run delays the next tick,
/// it never overlaps it. A failed run is logged and the loop continues; the
/// next tick is the retry.
pub async fn run_scheduler(
    aggregator: Arc<Aggregator>,
    interval_secs: u64,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval_secs = %interval_secs, "aggregation_scheduler_started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("aggregation_scheduler_shutdown");
                    return;
                }
            }
            _ = interval.tick() => {
                let started = std::time::Instant::now();
                match aggregator.run_once(chrono::Local::now()) {
                    Ok(summary) => {
                        metrics.record_aggregation_run();
                        info!(
                            baselines = %summary.baselines,
                            max_counts = %summary.max_counts,
                            time_buckets = %summary.time_buckets,
                            elapsed_ms = %started.elapsed().as_millis(),
                            "aggregation_completed"
                        );
                    }
                    Err(e) => {
                        metrics.record_aggregation_failure();
                        error!(error = %e, "aggregation_failed");
                    }
                }
            }
        }
    }
}
