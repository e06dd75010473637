use crate::core::{Clock, DbError, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Cache sizing and expiry settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Occupancy that forces a prune on the next `put`.
    pub max_size: usize,
    /// Entries older than this are treated as absent.
    pub expiration_interval_ms: u64,
    /// Minimum time between time-triggered prunes.
    pub prune_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            expiration_interval_ms: 60_000,
            prune_interval_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(DbError::ConfigurationError(
                "cache.max_size must be greater than zero".to_string(),
            ));
        }
        if self.expiration_interval_ms == 0 {
            return Err(DbError::ConfigurationError(
                "cache.expiration_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Reads that found an entry past its expiration.
    pub expired_reads: u64,
    pub pruned: u64,
    pub prune_runs: u64,
    /// Physical occupancy, including logically expired entries.
    pub size: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    expiration: Duration,
    last_prune: DateTime<Utc>,
    stats: CacheStats,
}

impl<V> CacheInner<V> {
    fn is_expired(&self, entry: &CacheEntry<V>, now: DateTime<Utc>) -> bool {
        now > entry.inserted_at + self.expiration
    }

    /// Drops expired entries, then evicts oldest-first under a shrinking age
    /// window until occupancy is below 90% of `max_size`. The window halves on
    /// every attempt and each attempt removes at most 10% of `max_size`, so
    /// the loop always terminates once the window reaches zero.
    fn prune(&mut self, now: DateTime<Utc>, max_size: usize) -> usize {
        let before = self.entries.len();
        let expiration = self.expiration;
        self.entries
            .retain(|_, entry| now <= entry.inserted_at + expiration);

        let target = (max_size.saturating_mul(9) / 10).max(1);
        let per_attempt = (max_size / 10).max(1);
        let mut window = expiration;
        let mut attempt = 0u32;

        while self.entries.len() >= target {
            attempt += 1;
            window = window / 2;
            let cutoff = now - window;

            let mut candidates = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.inserted_at <= cutoff)
                .map(|(key, entry)| (entry.inserted_at, key.clone()))
                .collect::<Vec<_>>();
            candidates.sort();

            let mut evicted = 0usize;
            for (_, key) in candidates.into_iter().take(per_attempt) {
                self.entries.remove(&key);
                evicted += 1;
            }

            if window.is_zero() && evicted == 0 {
                // Only entries stamped after `now` remain.
                warn!(
                    "item cache prune stopped after {} attempts with {} entries",
                    attempt,
                    self.entries.len()
                );
                break;
            }
        }

        self.last_prune = now;
        let removed = before - self.entries.len();
        self.stats.pruned += removed as u64;
        self.stats.prune_runs += 1;
        debug!(
            "item cache pruned {} of {} entries in {} attempt(s)",
            removed, before, attempt
        );
        removed
    }
}

/// Thread-safe TTL cache. Every operation takes one short-lived lock.
pub struct ItemCache<V> {
    max_size: usize,
    prune_interval: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> ItemCache<V> {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let now = clock.now();
        Ok(Self {
            max_size: config.max_size,
            prune_interval: Duration::milliseconds(config.prune_interval_ms as i64),
            clock,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                expiration: Duration::milliseconds(config.expiration_interval_ms as i64),
                last_prune: now,
                stats: CacheStats::default(),
            }),
        })
    }

    pub fn put(&self, key: &str, value: V) -> Result<()> {
        check_key(key)?;
        let now = self.clock.now();
        let mut inner = self.inner.lock()?;
        self.insert(&mut inner, key, value, now);
        Ok(())
    }

    /// Stores the value only when the slot is empty or expired, so an older
    /// read never replaces a live entry. Returns whether it was stored.
    pub fn put_if_absent(&self, key: &str, value: V) -> Result<bool> {
        check_key(key)?;
        let now = self.clock.now();
        let mut inner = self.inner.lock()?;

        let live = inner
            .entries
            .get(key)
            .is_some_and(|entry| !inner.is_expired(entry, now));
        if live {
            return Ok(false);
        }
        self.insert(&mut inner, key, value, now);
        Ok(true)
    }

    fn insert(&self, inner: &mut CacheInner<V>, key: &str, value: V, now: DateTime<Utc>) {
        let prune_due = now - inner.last_prune > self.prune_interval;
        if prune_due || inner.entries.len() >= self.max_size {
            inner.prune(now, self.max_size);
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Returns the value unless it is missing or older than the expiration interval.
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        check_key(key)?;
        let now = self.clock.now();
        let mut inner = self.inner.lock()?;

        let (value, expired) = match inner.entries.get(key) {
            Some(entry) if inner.is_expired(entry, now) => (None, true),
            Some(entry) => (Some(entry.value.clone()), false),
            None => (None, false),
        };

        match (&value, expired) {
            (Some(_), _) => inner.stats.hits += 1,
            (None, true) => {
                inner.stats.misses += 1;
                inner.stats.expired_reads += 1;
            }
            (None, false) => inner.stats.misses += 1,
        }
        Ok(value)
    }

    /// Returns whether an entry was physically present.
    pub fn remove(&self, key: &str) -> Result<bool> {
        check_key(key)?;
        let mut inner = self.inner.lock()?;
        Ok(inner.entries.remove(key).is_some())
    }

    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.entries.clear();
        Ok(())
    }

    pub fn set_expiration_interval(&self, interval: std::time::Duration) -> Result<()> {
        let interval = Duration::from_std(interval).map_err(|err| {
            DbError::InvalidArgument(format!("expiration interval out of range: {}", err))
        })?;
        if interval.is_zero() {
            return Err(DbError::InvalidArgument(
                "expiration interval must be greater than zero".to_string(),
            ));
        }
        self.inner.lock()?.expiration = interval;
        Ok(())
    }

    pub fn expiration_interval(&self) -> Result<std::time::Duration> {
        let inner = self.inner.lock()?;
        Ok(inner.expiration.to_std().unwrap_or_default())
    }

    /// Physical occupancy, including expired entries not yet pruned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let inner = self.inner.lock()?;
        let mut stats = inner.stats.clone();
        stats.size = inner.entries.len();
        Ok(stats)
    }
}

fn check_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(DbError::InvalidArgument(
            "cache key must not be empty".to_string(),
        ));
    }
    Ok(())
}
