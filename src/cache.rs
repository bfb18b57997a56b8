//! Distance cache keyed on rounded coordinates.
//!
//! Entries expire after a fixed TTL because traffic-aware durations go stale
//! quickly. Expired entries are ignored on read and dropped by
//! [`DistanceCache::purge_expired`] or by the next write to the same key.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use crate::geo::{CoordKey, Coordinate};
use crate::traffic::TrafficCondition;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub distance_km: f64,
    pub duration_secs: i32,
    pub duration_in_traffic_secs: i32,
    pub traffic: TrafficCondition,
    pub computed_at: DateTime<Utc>,
}

type PairKey = (CoordKey, CoordKey);

#[derive(Debug)]
pub struct DistanceCache {
    ttl: Duration,
    decimals: u32,
    entries: RwLock<HashMap<PairKey, CacheEntry>>,
}

impl DistanceCache {
    pub fn new(ttl: Duration, decimals: u32) -> Self {
        Self {
            ttl,
            decimals,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(&self, from: Coordinate, to: Coordinate) -> PairKey {
        (from.key(self.decimals), to.key(self.decimals))
    }

    /// A live entry for the pair, if one was written within the TTL.
    pub fn get(&self, from: Coordinate, to: Coordinate, now: DateTime<Utc>) -> Option<CacheEntry> {
        let key = self.key(from, to);
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries
            .get(&key)
            .filter(|entry| now - entry.computed_at < self.ttl)
            .copied()
    }

    pub fn insert(&self, from: Coordinate, to: Coordinate, entry: CacheEntry) {
        let key = self.key(from, to);
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.insert(key, entry);
    }

    /// Drop entries older than the TTL; returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| now - entry.computed_at < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
