//! Counter sinks
//!
//! Dispatch hands finished metric names to a [`CounterSink`]. Wire it to your
//! metrics backend, or use the in-process [`CounterRegistry`] which also backs
//! the JSON `/metrics` snapshot endpoint.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Fire-and-forget counter backend.
///
/// Implementations must not block and must swallow their own failures:
/// dispatch calls this on the request path.
pub trait CounterSink: Send + Sync {
    /// Increment counter `name` by one.
    fn increment(&self, name: &str);
}

impl<T: CounterSink + ?Sized> CounterSink for Arc<T> {
    fn increment(&self, name: &str) {
        (**self).increment(name)
    }
}

/// Thread-safe named counters using interior mutability.
///
/// Names are created on first increment.
#[derive(Debug, Default)]
pub struct CounterRegistry {
    values: RwLock<HashMap<String, AtomicU64>>,
}

impl CounterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Add `value` to counter `name`.
    pub fn add(&self, name: &str, value: u64) {
        // Fast path: counter already exists
        {
            let values = self.values.read();
            if let Some(counter) = values.get(name) {
                counter.fetch_add(value, Ordering::Relaxed);
                return;
            }
        }

        // Slow path: create it
        let mut values = self.values.write();
        values
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Current value of counter `name` (0 when never incremented).
    pub fn get(&self, name: &str) -> u64 {
        let values = self.values.read();
        values
            .get(name)
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All counters, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let values = self.values.read();
        values
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }

    /// Number of distinct counters.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether no counter was ever incremented.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Drop all counters (primarily for testing).
    pub fn reset(&self) {
        self.values.write().clear();
    }
}

impl CounterSink for CounterRegistry {
    fn increment(&self, name: &str) {
        self.add(name, 1);
    }
}
