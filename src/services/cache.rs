//! Single-slot TTL cache for the built status list
//!
//! One global result, not per-location: the status builder's output is the
//! whole response, and a short TTL bounds how stale it can get. Rebuilds run
//! outside the lock and are deliberately not mutually exclusive - concurrent
//! readers hitting an expired slot may each rebuild, which duplicates cheap
//! idempotent work but never produces incorrect state. Errors are never
//! cached; a no-data condition is re-evaluated on every read.

use crate::domain::LocationStatus;
use crate::infra::metrics::Metrics;
use crate::services::status::StatusError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct CachedStatus {
    computed_at: Instant,
    result: Arc<Vec<LocationStatus>>,
}

pub struct StatusCache {
    ttl: Duration,
    slot: Mutex<Option<CachedStatus>>,
    metrics: Arc<Metrics>,
}

impl StatusCache {
    pub fn new(ttl: Duration, metrics: Arc<Metrics>) -> Self {
        Self { ttl, slot: Mutex::new(None), metrics }
    }

    /// Return the cached result if fresh, otherwise invoke `build` and store
    /// its output. Two reads within the TTL return the same `Arc`.
    pub fn get_or_build<F>(&self, build: F) -> Result<Arc<Vec<LocationStatus>>, StatusError>
    where
        F: FnOnce() -> Result<Vec<LocationStatus>, StatusError>,
    {
        if let Some(cached) = self.slot.lock().as_ref() {
            if cached.computed_at.elapsed() < self.ttl {
                self.metrics.record_cache_hit();
                return Ok(cached.result.clone());
            }
        }

        self.metrics.record_cache_miss();
        let result = Arc::new(build()?);
        debug!(locations = %result.len(), "status_cache_filled");
        *self.slot.lock() = Some(CachedStatus { computed_at: Instant::now(), result: result.clone() });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(ttl: Duration) -> StatusCache {
        StatusCache::new(ttl, Arc::new(Metrics::new()))
    }

    #[test]
    fn test_second_read_within_ttl_returns_same_object() {
        let cache = cache(Duration::from_secs(30));
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        };

        let first = cache.get_or_build(build).unwrap();
        let second = cache
            .get_or_build(|| {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok(Vec::new())
            })
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_expired_slot_rebuilds() {
        let cache = cache(Duration::from_millis(0));
        let first = cache.get_or_build(|| Ok(Vec::new())).unwrap();
        let second = cache.get_or_build(|| Ok(Vec::new())).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = cache(Duration::from_secs(30));
        assert_eq!(cache.get_or_build(|| Err(StatusError::NoData)).unwrap_err(), StatusError::NoData);
        // The failed read left the slot empty; a later success fills it
        let result = cache.get_or_build(|| Ok(Vec::new())).unwrap();
        let again = cache.get_or_build(|| Err(StatusError::NoData)).unwrap();
        assert!(Arc::ptr_eq(&result, &again));
    }
}
