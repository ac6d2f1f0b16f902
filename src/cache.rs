//! Descriptor cache
//!
//! Memoizes `parse(user_agent) -> Descriptor` with a bounded LRU.
//!
//! # Guarantees
//!
//! - While an entry is resident, the parser runs at most once for its key.
//!   Callers racing on a string nobody has seen yet collapse onto a single
//!   parse and all receive the same `Arc<Descriptor>`.
//! - Exclusion is per key. The map lock only guards slot lookup/insert; the
//!   parse itself runs on the slot, so different strings never wait on each
//!   other's parse.
//! - Failures are not cached. Callers already waiting on a failing parse get
//!   its error; the slot is then dropped and the next lookup parses again.
//! - Memory is bounded by `capacity` entries (least recently used evicted).

use crate::descriptor::Descriptor;
use crate::error::ParseError;
use crate::parser::UserAgentParser;
use lru::LruCache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Default number of distinct user agents kept in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// Outcome of one parse attempt, shared by every caller that waited on it.
type Slot = Arc<OnceCell<Result<Arc<Descriptor>, ParseError>>>;

/// Bounded, single-flight cache of parsed descriptors.
pub struct DescriptorCache {
    parser: Arc<dyn UserAgentParser>,
    entries: Mutex<LruCache<String, Slot>>,
    parse_timeout: Option<Duration>,
    stats: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    parses: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups answered from an already parsed entry
    pub hits: u64,
    /// Lookups that had to wait for or run a parse
    pub misses: u64,
    /// Parser invocations
    pub parses: u64,
    /// Parser invocations that failed (including timeouts)
    pub failures: u64,
    /// Resident entries
    pub entries: usize,
}

impl DescriptorCache {
    /// Create a cache around `parser` holding at most `capacity` entries.
    pub fn new(parser: Arc<dyn UserAgentParser>, capacity: NonZeroUsize) -> Self {
        Self {
            parser,
            entries: Mutex::new(LruCache::new(capacity)),
            parse_timeout: None,
            stats: Counters::default(),
        }
    }

    /// Bound every parse by `timeout`.
    ///
    /// The parse then runs on a helper thread; when it does not answer in
    /// time every caller waiting on it gets [`ParseError::Timeout`] and the
    /// slot is dropped.
    pub fn with_parse_timeout(mut self, timeout: Duration) -> Self {
        self.parse_timeout = Some(timeout);
        self
    }

    /// Return the descriptor for `user_agent`, parsing it on first use.
    pub fn get_or_parse(&self, user_agent: &str) -> Result<Arc<Descriptor>, ParseError> {
        let slot = self.slot(user_agent);

        if let Some(Ok(descriptor)) = slot.get() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(descriptor.clone());
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        // Concurrent callers block here and share the first caller's outcome,
        // failures included.
        let outcome = slot.get_or_init(|| {
            self.stats.parses.fetch_add(1, Ordering::Relaxed);
            let result = self.run_parser(user_agent).map(Arc::new);
            if result.is_err() {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
            }
            result
        });

        match outcome {
            Ok(descriptor) => Ok(descriptor.clone()),
            Err(err) => {
                self.discard_failed(user_agent, &slot);
                trace!(error = %err, "Descriptor slot discarded after failed parse");
                Err(err.clone())
            }
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            parses: self.stats.parses.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Number of resident entries (including ones still being parsed).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Fetch or create the slot for `key`, touching its LRU position.
    fn slot(&self, key: &str) -> Slot {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get(key) {
            return slot.clone();
        }
        let slot = Slot::default();
        if let Some((evicted, _)) = entries.push(key.to_string(), slot.clone()) {
            trace!(user_agent = %evicted, "Evicted descriptor");
        }
        slot
    }

    /// Remove a failed slot so the next lookup parses again, unless it was
    /// already replaced.
    fn discard_failed(&self, key: &str, slot: &Slot) {
        let mut entries = self.entries.lock();
        let same_slot = entries
            .peek(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if same_slot {
            entries.pop(key);
        }
    }

    fn run_parser(&self, user_agent: &str) -> Result<Descriptor, ParseError> {
        let Some(timeout) = self.parse_timeout else {
            return self.parser.parse(user_agent);
        };

        let (tx, rx) = mpsc::sync_channel(1);
        let parser = Arc::clone(&self.parser);
        let input = user_agent.to_string();
        thread::Builder::new()
            .name("user-agent-parse".to_string())
            .spawn(move || {
                // Receiver may be gone after a timeout.
                let _ = tx.send(parser.parse(&input));
            })
            .map_err(|e| ParseError::parser(format!("failed to spawn parser thread: {e}")))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ParseError::Timeout { after: timeout }),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(ParseError::parser("parser thread exited without a result"))
            }
        }
    }
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("capacity", &self.capacity())
            .field("parse_timeout", &self.parse_timeout)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
