use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Decides which entry leaves a full [`BoundedCache`].
pub trait EvictionPolicy<K>: Send {
    fn on_insert(&mut self, key: &K);
    fn on_hit(&mut self, key: &K);
    fn on_remove(&mut self, key: &K);
    /// Next key to evict, removed from the policy's own bookkeeping.
    fn victim(&mut self) -> Option<K>;
}

/// Evicts in insertion order. Hits do not refresh an entry.
#[derive(Debug, Clone)]
pub struct OldestFirst<K> {
    order: VecDeque<K>,
}

impl<K> Default for OldestFirst<K> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }
}

impl<K: PartialEq + Clone + Send> EvictionPolicy<K> for OldestFirst<K> {
    fn on_insert(&mut self, key: &K) {
        self.order.push_back(key.clone());
    }

    fn on_hit(&mut self, _key: &K) {}

    fn on_remove(&mut self, key: &K) {
        self.order.retain(|k| k != key);
    }

    fn victim(&mut self) -> Option<K> {
        self.order.pop_front()
    }
}

/// Evicts the entry that was read or written longest ago.
#[derive(Debug, Clone)]
pub struct LeastRecentlyUsed<K> {
    order: VecDeque<K>,
}

impl<K> Default for LeastRecentlyUsed<K> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }
}

impl<K: PartialEq + Clone + Send> EvictionPolicy<K> for LeastRecentlyUsed<K> {
    fn on_insert(&mut self, key: &K) {
        self.order.push_back(key.clone());
    }

    fn on_hit(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }

    fn on_remove(&mut self, key: &K) {
        self.order.retain(|k| k != key);
    }

    fn victim(&mut self) -> Option<K> {
        self.order.pop_front()
    }
}

/// Fixed-capacity map. A capacity of 0 disables caching entirely.
#[derive(Debug)]
pub struct BoundedCache<K, V, P = OldestFirst<K>> {
    entries: HashMap<K, V>,
    policy: P,
    capacity: usize,
}

impl<K, V> BoundedCache<K, V, OldestFirst<K>>
where
    K: Eq + Hash + Clone + Send,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_policy(capacity, OldestFirst::default())
    }
}

impl<K, V, P> BoundedCache<K, V, P>
where
    K: Eq + Hash + Clone,
    P: EvictionPolicy<K>,
{
    pub fn with_policy(capacity: usize, policy: P) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            policy,
            capacity,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let value = self.entries.get(key).cloned()?;
        self.policy.on_hit(key);
        Some(value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }

        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = value;
            self.policy.on_hit(&key);
            return;
        }

        while self.entries.len() >= self.capacity {
            match self.policy.victim() {
                Some(victim) => {
                    self.entries.remove(&victim);
                }
                None => break,
            }
        }

        self.policy.on_insert(&key);
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        self.policy.on_remove(key);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        let keys: Vec<K> = self.entries.keys().cloned().collect();
        for key in &keys {
            self.policy.on_remove(key);
        }
        self.entries.clear();
    }
}
