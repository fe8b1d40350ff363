use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

struct Slot<V> {
    value: V,
    stored_at: Instant,
}

/// Bounded key-value cache with a fixed time to live. Injected into collaborators instead of
/// process-wide maps.
pub struct TtlCache<K, V> {
    ttl: Duration,
    capacity: usize,
    slots: HashMap<K, Slot<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            slots: HashMap::new(),
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn get_at(&mut self, key: &K, now: Instant) -> Option<V> {
        let expired = now.saturating_duration_since(self.slots.get(key)?.stored_at) > self.ttl;

        if expired {
            self.slots.remove(key);
            return None;
        }

        self.slots.get(key).map(|slot| slot.value.clone())
    }

    fn insert_at(&mut self, key: K, value: V, now: Instant) {
        let ttl = self.ttl;
        self.slots
            .retain(|_, slot| now.saturating_duration_since(slot.stored_at) <= ttl);

        if self.slots.len() >= self.capacity && !self.slots.contains_key(&key) {
            if let Some(oldest) = self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.stored_at)
                .map(|(k, _)| k.clone())
            {
                self.slots.remove(&oldest);
            }
        }

        self.slots.insert(
            key,
            Slot {
                value,
                stored_at: now,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_ttl() {
        let start = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(60), 8);
        cache.insert_at("1.2.3.4".to_string(), "Paris".to_string(), start);

        let key = "1.2.3.4".to_string();
        assert_eq!(
            cache.get_at(&key, start + Duration::from_secs(59)),
            Some("Paris".to_string())
        );
        assert_eq!(cache.get_at(&key, start + Duration::from_secs(61)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let start = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(60), 2);

        cache.insert_at("a", 1, start);
        cache.insert_at("b", 2, start + Duration::from_secs(1));
        cache.insert_at("c", 3, start + Duration::from_secs(2));

        let now = start + Duration::from_secs(3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_at(&"a", now), None);
        assert_eq!(cache.get_at(&"b", now), Some(2));
        assert_eq!(cache.get_at(&"c", now), Some(3));
    }

    #[test]
    fn overwrite_does_not_evict() {
        let start = Instant::now();
        let mut cache = TtlCache::new(Duration::from_secs(60), 2);

        cache.insert_at("a", 1, start);
        cache.insert_at("b", 2, start);
        cache.insert_at("a", 10, start + Duration::from_secs(1));

        let now = start + Duration::from_secs(2);
        assert_eq!(cache.get_at(&"a", now), Some(10));
        assert_eq!(cache.get_at(&"b", now), Some(2));
    }
}
