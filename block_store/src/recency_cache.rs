// Entries live in a dense `Vec` and are linked into a recency list by index.
// Removal moves the last entry into the vacated slot, so indices stay below `len`.

use core::{hash::Hash, num::NonZeroUsize};
use std::collections::HashMap;

/// Bounded map that evicts the least recently used entry when full.
pub struct RecencyCache<K, V> {
    capacity: NonZeroUsize,
    positions: HashMap<K, usize>,
    entries: Vec<Entry<K, V>>,
    newest: Option<usize>,
    oldest: Option<usize>,
}

struct Entry<K, V> {
    key: K,
    value: V,
    newer: Option<usize>,
    older: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> RecencyCache<K, V> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            positions: HashMap::with_capacity(capacity.get()),
            entries: Vec::with_capacity(capacity.get()),
            newest: None,
            oldest: None,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.positions.contains_key(key)
    }

    /// Looks up `key` without changing its recency.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        let index = *self.positions.get(key)?;
        Some(&self.entries[index].value)
    }

    /// Looks up `key` and marks it as the most recently used entry.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = *self.positions.get(key)?;
        self.promote(index);
        Some(&self.entries[index].value)
    }

    /// Inserts or replaces the value for `key`, making it the most recently used entry.
    ///
    /// Returns the entry evicted to make room for it, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&index) = self.positions.get(&key) {
            self.entries[index].value = value;
            self.promote(index);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity.get() {
            self.pop_oldest()
        } else {
            None
        };

        let index = self.entries.len();

        self.entries.push(Entry {
            key: key.clone(),
            value,
            newer: None,
            older: None,
        });

        self.positions.insert(key, index);
        self.attach_newest(index);

        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let index = self.positions.remove(key)?;

        self.detach(index);

        let entry = self.entries.swap_remove(index);

        if index < self.entries.len() {
            self.relink_moved(index);
        }

        Some(entry.value)
    }

    pub fn pop_oldest(&mut self) -> Option<(K, V)> {
        let key = self.entries[self.oldest?].key.clone();
        let value = self.remove(&key)?;
        Some((key, value))
    }

    /// Iterates from the most recently used entry to the least recently used one.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let mut cursor = self.newest;

        core::iter::from_fn(move || {
            let entry = &self.entries[cursor?];
            cursor = entry.older;
            Some((&entry.key, &entry.value))
        })
    }

    pub fn clear(&mut self) {
        self.positions.clear();
        self.entries.clear();
        self.newest = None;
        self.oldest = None;
    }

    fn promote(&mut self, index: usize) {
        if self.newest != Some(index) {
            self.detach(index);
            self.attach_newest(index);
        }
    }

    fn attach_newest(&mut self, index: usize) {
        let previous_newest = self.newest;

        {
            let entry = &mut self.entries[index];
            entry.newer = None;
            entry.older = previous_newest;
        }

        match previous_newest {
            Some(newest) => self.entries[newest].newer = Some(index),
            None => self.oldest = Some(index),
        }

        self.newest = Some(index);
    }

    fn detach(&mut self, index: usize) {
        let Entry { newer, older, .. } = self.entries[index];

        match newer {
            Some(newer) => self.entries[newer].older = older,
            None => self.newest = older,
        }

        match older {
            Some(older) => self.entries[older].newer = newer,
            None => self.oldest = newer,
        }

        let entry = &mut self.entries[index];
        entry.newer = None;
        entry.older = None;
    }

    // The entry now at `index` used to be the last one. Point its neighbors and its key at `index`.
    fn relink_moved(&mut self, index: usize) {
        let Entry { newer, older, .. } = self.entries[index];

        match newer {
            Some(newer) => self.entries[newer].older = Some(index),
            None => self.newest = Some(index),
        }

        match older {
            Some(older) => self.entries[older].newer = Some(index),
            None => self.oldest = Some(index),
        }

        if let Some(position) = self.positions.get_mut(&self.entries[index].key) {
            *position = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use nonzero_ext::nonzero;

    use super::*;

    fn keys(cache: &RecencyCache<u8, char>) -> Vec<u8> {
        cache.iter().map(|(key, _)| *key).collect()
    }

    #[test]
    fn evicts_least_recently_used_entry() {
        let mut cache = RecencyCache::new(nonzero!(3_usize));

        assert_eq!(cache.insert(1, 'a'), None);
        assert_eq!(cache.insert(2, 'b'), None);
        assert_eq!(cache.insert(3, 'c'), None);
        assert_eq!(cache.get(&1), Some(&'a'));
        assert_eq!(cache.insert(4, 'd'), Some((2, 'b')));

        assert_eq!(keys(&cache), [4, 1, 3]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn peek_does_not_change_recency() {
        let mut cache = RecencyCache::new(nonzero!(2_usize));

        cache.insert(1, 'a');
        cache.insert(2, 'b');

        assert_eq!(cache.peek(&1), Some(&'a'));
        assert_eq!(cache.insert(3, 'c'), Some((1, 'a')));
    }

    #[test]
    fn replacing_a_value_promotes_it() {
        let mut cache = RecencyCache::new(nonzero!(2_usize));

        cache.insert(1, 'a');
        cache.insert(2, 'b');

        assert_eq!(cache.insert(1, 'z'), None);
        assert_eq!(keys(&cache), [1, 2]);
        assert_eq!(cache.peek(&1), Some(&'z'));
    }

    #[test]
    fn remove_keeps_links_consistent() {
        let mut cache = RecencyCache::new(nonzero!(4_usize));

        for (key, value) in [(1, 'a'), (2, 'b'), (3, 'c'), (4, 'd')] {
            cache.insert(key, value);
        }

        // Removing the first slot moves the last entry into it.
        assert_eq!(cache.remove(&1), Some('a'));
        assert_eq!(keys(&cache), [4, 3, 2]);

        assert_eq!(cache.remove(&3), Some('c'));
        assert_eq!(keys(&cache), [4, 2]);

        assert_eq!(cache.get(&2), Some(&'b'));
        assert_eq!(keys(&cache), [2, 4]);

        assert_eq!(cache.pop_oldest(), Some((4, 'd')));
        assert_eq!(cache.pop_oldest(), Some((2, 'b')));
        assert_eq!(cache.pop_oldest(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_of_missing_key_is_a_no_op() {
        let mut cache = RecencyCache::new(nonzero!(1_usize));

        cache.insert(1, 'a');

        assert_eq!(cache.remove(&2), None);
        assert!(cache.contains(&1));
    }

    #[test]
    fn capacity_of_one_always_holds_latest_entry() {
        let mut cache = RecencyCache::new(nonzero!(1_usize));

        cache.insert(1, 'a');

        assert_eq!(cache.insert(2, 'b'), Some((1, 'a')));
        assert_eq!(keys(&cache), [2]);
        assert_eq!(cache.capacity().get(), 1);
    }
}
