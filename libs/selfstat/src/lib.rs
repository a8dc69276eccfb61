//! # Self Stats
//!
//! Named, tagged counters a service keeps about itself (bytes received,
//! requests served, authentication failures, ...).
//!
//! A [`Registry`] is constructed explicitly and shared through an `Arc`.
//! Registration is get-or-create: asking twice for the same
//! (measurement, field, tags) identity hands back the same [`Stat`], so
//! independent components can register the counters they update without
//! coordinating.
//!
//! ```rust
//! use selfstat::Registry;
//!
//! let registry = Registry::new();
//! let served = registry.register("write_listener", "requests_served", &[("address", ":8086")]);
//! served.incr(1);
//!
//! let again = registry.register("write_listener", "requests_served", &[("address", ":8086")]);
//! assert_eq!(again.get(), 1);
//! ```

use dashmap::DashMap;
use line_protocol::{FieldValue, Record};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Prefix applied to measurement names when stats are exported as records
pub const MEASUREMENT_PREFIX: &str = "internal_";

/// Identity of a counter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatKey {
    pub measurement: String,
    pub field: String,
    pub tags: BTreeMap<String, String>,
}

impl StatKey {
    pub fn new(measurement: &str, field: &str, tags: &[(&str, &str)]) -> Self {
        Self {
            measurement: measurement.to_string(),
            field: field.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// A single lock-free counter
#[derive(Debug)]
pub struct Stat {
    key: StatKey,
    value: AtomicI64,
}

impl Stat {
    fn new(key: StatKey) -> Self {
        Self {
            key,
            value: AtomicI64::new(0),
        }
    }

    pub fn incr(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn key(&self) -> &StatKey {
        &self.key
    }
}

/// Set of counters living for as long as the owning process holds it
#[derive(Debug, Default)]
pub struct Registry {
    stats: DashMap<StatKey, Arc<Stat>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter for this identity
    pub fn register(&self, measurement: &str, field: &str, tags: &[(&str, &str)]) -> Arc<Stat> {
        let key = StatKey::new(measurement, field, tags);
        let entry = self.stats.entry(key.clone()).or_insert_with(|| {
            debug!(
                measurement = %key.measurement,
                field = %key.field,
                "registered self stat"
            );
            Arc::new(Stat::new(key))
        });
        Arc::clone(entry.value())
    }

    /// Look up an existing counter without creating it
    pub fn get(&self, measurement: &str, field: &str, tags: &[(&str, &str)]) -> Option<Arc<Stat>> {
        let key = StatKey::new(measurement, field, tags);
        self.stats.get(&key).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Export the current values as records stamped with the current time
    pub fn snapshot(&self) -> Vec<Record> {
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        self.snapshot_at(now)
    }

    /// One record per (measurement, tags), one integer field per counter
    pub fn snapshot_at(&self, timestamp: i64) -> Vec<Record> {
        let mut grouped: BTreeMap<(String, BTreeMap<String, String>), Record> = BTreeMap::new();

        for entry in self.stats.iter() {
            let stat = entry.value();
            let key = stat.key();
            let record = grouped
                .entry((key.measurement.clone(), key.tags.clone()))
                .or_insert_with(|| {
                    let mut record =
                        Record::new(format!("{}{}", MEASUREMENT_PREFIX, key.measurement), timestamp);
                    record.tags = key.tags.clone();
                    record
                });
            record
                .fields
                .insert(key.field.clone(), FieldValue::Integer(stat.get()));
        }

        grouped.into_values().collect()
    }
}
