//! Coalescing of repeated metric-value removals
//!
//! A metric whose old points were removed a moment ago does not need the
//! same ZREMRANGEBYSCORE again. Two bloom filter generations remember the
//! metrics removed during the current and the previous window.

use parking_lot::Mutex;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::store::Clock;

/// Space-efficient membership filter. False positives are possible, false
/// negatives are not.
#[derive(Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_hashes: u32,
    num_bits: usize,
    count: usize,
}

impl BloomFilter {
    /// Create a filter sized for `expected_items` at the given false positive rate
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let expected_items = expected_items.max(1);
        // m = -n*ln(p) / (ln(2)^2)
        let ln2_squared = std::f64::consts::LN_2 * std::f64::consts::LN_2;
        let num_bits = (-(expected_items as f64) * false_positive_rate.ln() / ln2_squared)
            .ceil() as usize;
        let num_bits = num_bits.max(64);

        // k = (m/n) * ln(2)
        let num_hashes = ((num_bits as f64 / expected_items as f64) * std::f64::consts::LN_2)
            .ceil() as u32;

        let num_words = (num_bits + 63) / 64;
        Self {
            bits: vec![0u64; num_words],
            num_hashes: num_hashes.clamp(1, 16),
            num_bits: num_words * 64,
            count: 0,
        }
    }

    pub fn insert(&mut self, value: &str) {
        let (h1, h2) = hash_pair(value);
        for i in 0..self.num_hashes {
            let idx = self.index(h1, h2, i);
            self.bits[idx / 64] |= 1u64 << (idx % 64);
        }
        self.count += 1;
    }

    pub fn might_contain(&self, value: &str) -> bool {
        let (h1, h2) = hash_pair(value);
        (0..self.num_hashes).all(|i| {
            let idx = self.index(h1, h2, i);
            self.bits[idx / 64] & (1u64 << (idx % 64)) != 0
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
        self.count = 0;
    }

    // Double hashing: h(i) = h1 + i*h2
    fn index(&self, h1: u64, h2: u64, i: u32) -> usize {
        let hash = h1.wrapping_add((i as u64).wrapping_mul(h2));
        (hash as usize) % self.num_bits
    }
}

fn hash_pair(value: &str) -> (u64, u64) {
    let mut hasher1 = fxhash::FxHasher64::default();
    value.hash(&mut hasher1);
    let h1 = hasher1.finish();

    let mut hasher2 = fxhash::FxHasher64::default();
    h1.hash(&mut hasher2);
    value.hash(&mut hasher2);
    (h1, hasher2.finish())
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("count", &self.count)
            .finish()
    }
}

struct Generations {
    current: BloomFilter,
    previous: BloomFilter,
    rotated_at: i64,
}

/// Remembers recently removed metrics for one to two windows
pub struct RemovalCoalescer {
    generations: Mutex<Generations>,
    window_millis: i64,
    clock: Arc<dyn Clock>,
}

impl RemovalCoalescer {
    pub fn new(clock: Arc<dyn Clock>, window: Duration, expected_items: usize) -> Self {
        let filter = BloomFilter::new(expected_items, 0.01);
        Self {
            generations: Mutex::new(Generations {
                current: filter.clone(),
                previous: filter,
                rotated_at: clock.now_millis(),
            }),
            window_millis: window.as_millis() as i64,
            clock,
        }
    }

    /// Returns true when the metric was not removed recently, and records it
    pub fn should_remove(&self, metric: &str) -> bool {
        let now = self.clock.now_millis();
        let mut g = self.generations.lock();

        let elapsed = now - g.rotated_at;
        if elapsed >= self.window_millis {
            if elapsed >= 2 * self.window_millis {
                g.previous.clear();
                g.current.clear();
            } else {
                let Generations {
                    current, previous, ..
                } = &mut *g;
                std::mem::swap(current, previous);
                current.clear();
            }
            g.rotated_at = now;
        }

        if g.current.might_contain(metric) || g.previous.might_contain(metric) {
            return false;
        }
        g.current.insert(metric);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ManualClock;

    #[test]
    fn test_bloom_no_false_negatives() {
        let mut filter = BloomFilter::new(1000, 0.01);
        for i in 0..1000 {
            filter.insert(&format!("metric.{}", i));
        }
        for i in 0..1000 {
            assert!(filter.might_contain(&format!("metric.{}", i)));
        }
        assert_eq!(filter.count(), 1000);
    }

    #[test]
    fn test_coalescer_windows() {
        let clock = Arc::new(ManualClock::at_secs(0));
        let coalescer = RemovalCoalescer::new(clock.clone(), Duration::from_secs(10), 100);

        assert!(coalescer.should_remove("a"));
        assert!(!coalescer.should_remove("a"));

        // Still remembered one window later
        clock.advance(Duration::from_secs(10));
        assert!(!coalescer.should_remove("a"));

        // Forgotten after two rotations
        clock.advance(Duration::from_secs(10));
        clock.advance(Duration::from_secs(1));
        assert!(coalescer.should_remove("a"));
    }
}
