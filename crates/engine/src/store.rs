//! State stores backing the gate and the level resolver.
//!
//! Three keyed maps are kept: dedup entries, rate windows and prior failure
//! state. Every trait method is a single check-and-update step for one key, so
//! concurrent callers evaluating the same fingerprint or identity can never
//! both observe "not expired", "under limit" or "was failing" and both proceed.
//!
//! `MemoryStore` holds the maps in-process. Entries are evicted lazily on the
//! next lookup of their key, and once a map grows past the prune threshold a
//! write sweeps out every expired entry; there is no background sweeper. `RedisStore`
//! (see `redis_store`) shares the same state across processes.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use probe_common::ProbeError;

use crate::clock;

/// Map size above which a write sweeps expired entries first.
pub const DEFAULT_PRUNE_THRESHOLD: usize = 10_000;

pub trait StateStore: Send + Sync {
    /// Admit `key` unless an unexpired dedup entry exists. On admit, (re)write
    /// the entry with expiry `now + ttl`.
    ///
    /// Returns `true` if admitted, `false` if the key is a duplicate.
    fn check_and_set_dedup(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, ProbeError>;

    /// Admit `key` if fewer than `max` sends were admitted in `(now - window, now]`,
    /// recording `now` on admit.
    fn check_and_record_rate(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, ProbeError>;

    /// Store `failing` for `identity` and return the previous value.
    /// An identity seen for the first time was not failing.
    fn swap_failing(&self, identity: &str, failing: bool) -> Result<bool, ProbeError>;

    /// Drop the dedup entry for `key`.
    fn clear_dedup(&self, key: &str) -> Result<(), ProbeError>;
}

/// Dedup bookkeeping for one fingerprint.
#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Occurrences seen while this entry was live, including the admitted one.
    pub hits: u64,
}

impl DedupEntry {
    fn expired() -> Self {
        Self {
            last_seen_at: DateTime::<Utc>::MIN_UTC,
            expires_at: DateTime::<Utc>::MIN_UTC,
            hits: 0,
        }
    }
}

/// Admitted-send timestamps inside the trailing window, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RateWindowState {
    pub timestamps: VecDeque<DateTime<Utc>>,
}

impl RateWindowState {
    /// Discard timestamps at or before `cutoff`.
    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self.timestamps.front().is_some_and(|ts| *ts <= cutoff) {
            self.timestamps.pop_front();
        }
    }
}

/// Last known failure state of one alert identity.
#[derive(Debug, Clone, Default)]
pub struct PriorStateRecord {
    pub is_failing: bool,
    pub observations: u64,
}

/// In-process store. Each map is sharded; holding a `DashMap` entry locks its
/// shard, which makes every operation atomic per key.
#[derive(Debug)]
pub struct MemoryStore {
    dedup: DashMap<String, DedupEntry>,
    rates: DashMap<String, RateWindowState>,
    prior: DashMap<String, PriorStateRecord>,
    prune_threshold: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            dedup: DashMap::new(),
            rates: DashMap::new(),
            prior: DashMap::new(),
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prune_threshold(mut self, threshold: usize) -> Self {
        self.prune_threshold = threshold;
        self
    }

    /// Stored failure state for an identity, if it has been observed.
    pub fn prior_state(&self, identity: &str) -> Option<bool> {
        self.prior.get(identity).map(|r| r.is_failing)
    }

    pub fn dedup_entry(&self, key: &str) -> Option<DedupEntry> {
        self.dedup.get(key).map(|e| e.clone())
    }

    /// Number of tracked dedup keys (live or not yet evicted).
    pub fn tracked_dedup_keys(&self) -> usize {
        self.dedup.len()
    }

    pub fn tracked_rate_keys(&self) -> usize {
        self.rates.len()
    }

    // Must run before an entry guard is taken: `retain` locks every shard.
    fn prune_dedup(&self, now: DateTime<Utc>) {
        if self.dedup.len() <= self.prune_threshold {
            return;
        }
        let before = self.dedup.len();
        self.dedup.retain(|_, entry| entry.expires_at > now);
        tracing::debug!(before, after = self.dedup.len(), "Pruned expired dedup entries");
    }

    fn prune_rates(&self, cutoff: DateTime<Utc>) {
        if self.rates.len() <= self.prune_threshold {
            return;
        }
        let before = self.rates.len();
        self.rates
            .retain(|_, state| state.timestamps.back().is_some_and(|ts| *ts > cutoff));
        tracing::debug!(before, after = self.rates.len(), "Pruned idle rate windows");
    }
}

impl StateStore for MemoryStore {
    fn check_and_set_dedup(
        &self,
        key: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, ProbeError> {
        self.prune_dedup(now);
        let mut entry = self
            .dedup
            .entry(key.to_owned())
            .or_insert_with(DedupEntry::expired);

        if entry.expires_at > now {
            entry.last_seen_at = now;
            entry.hits += 1;
            return Ok(false);
        }

        *entry = DedupEntry {
            last_seen_at: now,
            expires_at: clock::add(now, ttl),
            hits: 1,
        };
        Ok(true)
    }

    fn check_and_record_rate(
        &self,
        key: &str,
        window: Duration,
        max: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, ProbeError> {
        let cutoff = clock::sub(now, window);
        self.prune_rates(cutoff);
        let mut state = self.rates.entry(key.to_owned()).or_default();
        state.prune(cutoff);

        if state.timestamps.len() >= max as usize {
            return Ok(false);
        }

        state.timestamps.push_back(now);
        Ok(true)
    }

    fn swap_failing(&self, identity: &str, failing: bool) -> Result<bool, ProbeError> {
        let mut record = self.prior.entry(identity.to_owned()).or_default();
        let previous = record.is_failing;
        record.is_failing = failing;
        record.observations += 1;
        Ok(previous)
    }

    fn clear_dedup(&self, key: &str) -> Result<(), ProbeError> {
        self.dedup.remove(key);
        Ok(())
    }
}
