//! Key partitioner for shard assignment
//!
//! A key is assigned to a slot by hashing its partition tag: the first
//! non-empty `{...}` segment, or the whole key when it has none. Keys sharing
//! a tag always land on the same shard, which is what lets multi-key
//! transactions stay legal in cluster mode.

/// Extract the partition tag of a key
pub fn hash_tag(key: &str) -> &str {
    if let Some(open) = key.find('{') {
        if let Some(len) = key[open + 1..].find('}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Assigns keys to shards by partition tag
#[derive(Debug, Clone)]
pub struct KeyPartitioner {
    shards: usize,
}

impl KeyPartitioner {
    pub fn new(shards: usize) -> Self {
        Self {
            shards: shards.max(1),
        }
    }

    /// Number of shards
    pub fn shards(&self) -> usize {
        self.shards
    }

    /// Whether keys may live on different shards
    pub fn is_cluster(&self) -> bool {
        self.shards > 1
    }

    /// Slot for a key
    pub fn slot(&self, key: &str) -> usize {
        if self.shards == 1 {
            return 0;
        }
        let hash = fxhash::hash64(hash_tag(key).as_bytes());
        (hash as usize) % self.shards
    }

    /// Sorted, deduplicated slots of a key set
    pub fn slots<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<usize> {
        let mut slots: Vec<usize> = keys.into_iter().map(|k| self.slot(k)).collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }
}

impl Default for KeyPartitioner {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_tag() {
        assert_eq!(hash_tag("{moira-tag-triggers}:tag1"), "moira-tag-triggers");
        assert_eq!(hash_tag("moira-trigger:abc"), "moira-trigger:abc");
        assert_eq!(hash_tag("a{}b{c}"), "a{}b{c}");
        assert_eq!(hash_tag("a{b"), "a{b");
    }

    #[test]
    fn test_same_tag_same_slot() {
        let partitioner = KeyPartitioner::new(16);
        let a = partitioner.slot("{moira-triggers-list}:moira-triggers-list");
        let b = partitioner.slot("{moira-triggers-list}:moira-remote-triggers-list");
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_shard() {
        let partitioner = KeyPartitioner::default();
        assert!(!partitioner.is_cluster());
        assert_eq!(partitioner.slots(["a", "b", "c"]), vec![0]);
    }
}
