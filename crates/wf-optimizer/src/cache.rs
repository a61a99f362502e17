//! Bounded least-recently-used memo of objective values.

use std::collections::VecDeque;

/// Cache key: the exact bit patterns of a parameter vector.
///
/// `-0.0` is folded into `0.0` so keys follow numeric equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VectorKey(Vec<u64>);

impl VectorKey {
    fn new(x: &[f64]) -> Self {
        Self(
            x.iter()
                .map(|v| if *v == 0.0 { 0.0f64.to_bits() } else { v.to_bits() })
                .collect(),
        )
    }
}

/// Memo of objective values for exact parameter vectors.
///
/// Capacity is small (the simplex only ever revisits recent points), so a
/// linear scan over a recency-ordered deque is enough.
#[derive(Debug)]
pub struct MemoCache {
    entries: VecDeque<(VectorKey, f64)>,
    capacity: usize,
    stats: CacheStats,
}

impl MemoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            stats: CacheStats::default(),
        }
    }

    /// Look up `x`, marking it most recently used on a hit.
    pub fn get(&mut self, x: &[f64]) -> Option<f64> {
        let key = VectorKey::new(x);
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(index) => {
                let entry = self.entries.remove(index)?;
                let value = entry.1;
                self.entries.push_back(entry);
                self.stats.hits += 1;
                Some(value)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Store the value for `x`, evicting the least recently used entry when
    /// full. A zero capacity disables caching.
    pub fn insert(&mut self, x: &[f64], value: f64) {
        if self.capacity == 0 {
            return;
        }
        let key = VectorKey::new(x);
        if let Some(index) = self.entries.iter().position(|(k, _)| *k == key) {
            self.entries.remove(index);
        } else if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.stats.evictions += 1;
        }
        self.entries.push_back((key, value));
        self.stats.stores += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = CacheStats::default();
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}
