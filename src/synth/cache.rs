//! Bounded LRU cache for rendered audio, with per-entry TTL.
//!
//! A hit both returns the bytes and promotes the entry to most recently
//! used; expired entries count as misses and are dropped on access. A
//! capacity or TTL of zero disables the cache entirely.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Everything that distinguishes one rendered clip from another.
///
/// Float parameters are stored as raw bits so the key is `Eq + Hash`;
/// equality of the bit patterns is exactly what "same parameters" means
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub voice: String,
    pub text: String,
    pub format: String,
    pub speaker: Option<u32>,
    pub length_scale: Option<u32>,
    pub noise_scale: Option<u32>,
    pub noise_w: Option<u32>,
    pub sentence_silence: Option<u32>,
    pub normalized: bool,
}

impl CacheKey {
    /// Bit-pattern encoding for an optional float parameter.
    pub fn bits(v: Option<f32>) -> Option<u32> {
        v.map(f32::to_bits)
    }
}

struct Entry {
    data: Bytes,
    inserted: Instant,
    seq: u64,
}

struct Inner {
    map: HashMap<CacheKey, Entry>,
    // seq -> key, ordered oldest-use first. Promotion reassigns the seq.
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
}

/// LRU + TTL audio cache.
pub struct AudioCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl AudioCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Zero capacity or zero TTL means no caching at all.
    pub fn disabled(&self) -> bool {
        self.capacity == 0 || self.ttl.is_zero()
    }

    /// Look up `key`; a hit promotes the entry to most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        if self.disabled() {
            return None;
        }
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired = match inner.map.get(key) {
            None => return None,
            Some(entry) => is_expired(entry.inserted, now, self.ttl),
        };
        if expired {
            let entry = inner.map.remove(key).expect("entry checked above");
            inner.order.remove(&entry.seq);
            return None;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = inner.map.get_mut(key).expect("entry checked above");
        let old_seq = entry.seq;
        entry.seq = seq;
        let data = entry.data.clone();
        inner.order.remove(&old_seq);
        inner.order.insert(seq, key.clone());
        Some(data)
    }

    /// Insert `data` under `key`, evicting the least recently used entry
    /// if the cache is full.
    pub fn put(&self, key: CacheKey, data: Bytes) {
        if self.disabled() {
            return;
        }
        let mut inner = self.inner.lock();

        if let Some(old) = inner.map.remove(&key) {
            inner.order.remove(&old.seq);
        } else if inner.map.len() >= self.capacity {
            let oldest = inner.order.keys().next().copied();
            if let Some(oldest_seq) = oldest {
                if let Some(oldest_key) = inner.order.remove(&oldest_seq) {
                    inner.map.remove(&oldest_key);
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.map.insert(
            key,
            Entry {
                data,
                inserted: Instant::now(),
                seq,
            },
        );
    }

    /// Number of live entries (expired ones may still be counted until
    /// touched).
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }
}

/// An entry stays live through its exact TTL and expires strictly after.
fn is_expired(inserted: Instant, now: Instant, ttl: Duration) -> bool {
    now.duration_since(inserted) > ttl
}
