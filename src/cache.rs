//! In-process cache of fetched measurement series.
//!
//! Keyed by `(city, days)`. Entries live until the caller invalidates them,
//! until they go stale (when a maximum age is set) or until the entry limit
//! pushes the oldest one out. Stale entries are removed, not just skipped.
//! Safe to share behind an `Arc` across request handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::models::MeasurementSeries;

// ---

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    city: String,
    days: u32,
}

#[derive(Debug)]
struct CacheEntry {
    series: Arc<MeasurementSeries>,
    stored_at: Instant,
}

/// Thread-safe `(city, days) -> series` cache.
#[derive(Debug, Default)]
pub struct SeriesCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    max_age: Option<Duration>,
    max_entries: Option<usize>,
}

impl SeriesCache {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries older than `max_age` are dropped.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// At most `max_entries` series are kept; inserting past the limit
    /// evicts the oldest entry. Zero is treated as one.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    fn is_stale(&self, entry: &CacheEntry) -> bool {
        self.max_age
            .is_some_and(|max| entry.stored_at.elapsed() > max)
    }

    /// Cached series, unless absent or stale. A stale entry is evicted.
    pub fn get(&self, city: &str, days: u32) -> Option<Arc<MeasurementSeries>> {
        // ---
        let key = CacheKey {
            city: city.to_string(),
            days,
        };
        {
            let entries = self.entries.read();
            let entry = entries.get(&key)?;
            if !self.is_stale(entry) {
                return Some(Arc::clone(&entry.series));
            }
        }

        let mut entries = self.entries.write();
        // Another writer may have refreshed the entry in between
        if entries.get(&key).is_some_and(|e| self.is_stale(e)) {
            entries.remove(&key);
        }
        None
    }

    /// Store a series, replacing any previous entry for the key.
    ///
    /// Purges stale entries first, then evicts the oldest entries while the
    /// limit would be exceeded.
    pub fn insert(&self, days: u32, series: MeasurementSeries) -> Arc<MeasurementSeries> {
        // ---
        let series = Arc::new(series);
        let key = CacheKey {
            city: series.city().to_string(),
            days,
        };

        let mut entries = self.entries.write();
        entries.retain(|_, e| !self.is_stale(e));
        entries.remove(&key);
        if let Some(limit) = self.max_entries {
            while entries.len() >= limit {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        entries.remove(&k);
                    }
                    None => break,
                }
            }
        }
        entries.insert(
            key,
            CacheEntry {
                series: Arc::clone(&series),
                stored_at: Instant::now(),
            },
        );
        series
    }

    /// Drop every stale entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        // ---
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| !self.is_stale(e));
        before - entries.len()
    }

    /// Drop one `(city, days)` entry. Returns whether it existed.
    pub fn invalidate(&self, city: &str, days: u32) -> bool {
        // ---
        let key = CacheKey {
            city: city.to_string(),
            days,
        };
        self.entries.write().remove(&key).is_some()
    }

    /// Drop every entry for `city`. Returns how many were removed.
    pub fn invalidate_city(&self, city: &str) -> usize {
        // ---
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| k.city != city);
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn keyed_by_city_and_days() {
        // ---
        let cache = SeriesCache::new();
        cache.insert(30, MeasurementSeries::empty("Delhi"));
        cache.insert(7, MeasurementSeries::empty("Delhi"));
        cache.insert(30, MeasurementSeries::empty("Mumbai"));

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("Delhi", 30).unwrap().city(), "Delhi");
        assert!(cache.get("Delhi", 14).is_none());
        assert!(cache.get("Chennai", 30).is_none());
    }

    #[test]
    fn invalidation_is_explicit() {
        // ---
        let cache = SeriesCache::new();
        cache.insert(30, MeasurementSeries::empty("Delhi"));
        cache.insert(7, MeasurementSeries::empty("Delhi"));
        cache.insert(30, MeasurementSeries::empty("Mumbai"));

        assert!(cache.invalidate("Mumbai", 30));
        assert!(!cache.invalidate("Mumbai", 30));
        assert_eq!(cache.invalidate_city("Delhi"), 2);
        assert!(cache.is_empty());

        cache.insert(1, MeasurementSeries::empty("Kolkata"));
        cache.clear();
        assert!(cache.get("Kolkata", 1).is_none());
    }

    #[test]
    fn stale_entry_is_evicted_on_get() {
        // ---
        let cache = SeriesCache::new().with_max_age(Duration::ZERO);
        cache.insert(30, MeasurementSeries::empty("Delhi"));
        std::thread::sleep(Duration::from_millis(2));

        assert!(cache.get("Delhi", 30).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_purges_stale_entries() {
        // ---
        let cache = SeriesCache::new().with_max_age(Duration::from_millis(50));
        for city in ["Atlantis", "Lemuria", "Mu"] {
            cache.insert(30, MeasurementSeries::empty(city));
        }
        std::thread::sleep(Duration::from_millis(80));

        cache.insert(30, MeasurementSeries::empty("Delhi"));
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn entry_limit_evicts_oldest() {
        // ---
        let cache = SeriesCache::new().with_max_entries(2);
        cache.insert(30, MeasurementSeries::empty("Delhi"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(30, MeasurementSeries::empty("Mumbai"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(30, MeasurementSeries::empty("Chennai"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("Delhi", 30).is_none());
        assert!(cache.get("Mumbai", 30).is_some());
        assert!(cache.get("Chennai", 30).is_some());

        // Replacing an existing key does not evict another
        cache.insert(30, MeasurementSeries::empty("Mumbai"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("Chennai", 30).is_some());
    }
}
