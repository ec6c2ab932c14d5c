//! A hash map based on external memory.
//!
//! Unlike `std::collections::HashMap` this map never grows. When all buckets are in use,
//! insertion fails visibly instead of allocating, which the caller turns into backpressure (a
//! refused connection attempt, a dropped request). The hasher is supplied at construction so the
//! demultiplexing tables can be keyed with a secret, randomizing bucket placement against an
//! adversarial peer.
use core::hash::{BuildHasher, Hash, Hasher};
use core::mem;

use super::Slice;

/// A single storage cell of the map.
///
/// Exposed so that callers can create backing storage, e.g. `[Bucket::Empty; SIZE]`.
#[derive(Clone, Debug)]
pub enum Bucket<K, V> {
    /// Never held an entry since the last probe chain ended here.
    Empty,

    /// Held an entry that was removed.
    ///
    /// Probe chains walk over tombstones but insertion may recycle them.
    Tombstone,

    /// Holds a live entry.
    Occupied {
        /// The cached hash of `key`, compared before the key itself.
        hash: u64,
        /// The lookup key.
        key: K,
        /// The stored value.
        value: V,
    },
}

/// A fixed-capacity hash map over caller-provided buckets.
///
/// Collisions are resolved by linear probing. Removal leaves a tombstone so that probe chains
/// through the removed bucket stay intact.
pub struct HashMap<'a, K, V, H> {
    buckets: Slice<'a, Bucket<K, V>>,
    hasher: H,
    len: usize,
}

/// A view into a single map slot, occupied or vacant.
pub enum Entry<'map, 'a, K, V, H> {
    /// The key is present.
    Occupied(OccupiedEntry<'map, 'a, K, V, H>),
    /// The key is absent and a bucket is available for it.
    Vacant(VacantEntry<'map, 'a, K, V, H>),
    /// The key is absent and every bucket is in use.
    Full,
}

/// A view into a bucket holding the looked-up key.
pub struct OccupiedEntry<'map, 'a, K, V, H> {
    map: &'map mut HashMap<'a, K, V, H>,
    idx: usize,
}

/// A view into a bucket where the looked-up key can be inserted.
pub struct VacantEntry<'map, 'a, K, V, H> {
    map: &'map mut HashMap<'a, K, V, H>,
    idx: usize,
    hash: u64,
    key: K,
}

impl<'a, K, V, H> HashMap<'a, K, V, H> {
    /// Create a map over the given bucket storage.
    ///
    /// All buckets are reset to `Empty`, previous contents are dropped.
    pub fn new(mut buckets: Slice<'a, Bucket<K, V>>, hasher: H) -> Self {
        for bucket in buckets.iter_mut() {
            *bucket = Bucket::Empty;
        }

        HashMap {
            buckets,
            hasher,
            len: 0,
        }
    }

    /// The number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Iterate over all entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.iter().filter_map(|bucket| match bucket {
            Bucket::Occupied { key, value, .. } => Some((key, value)),
            _ => None,
        })
    }
}

impl<'a, K, V, H> HashMap<'a, K, V, H>
where
    K: Eq + Hash,
    H: BuildHasher,
{
    fn hash_of(&self, key: &K) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    /// Walk the probe chain of `key`.
    ///
    /// Returns the index of the occupied bucket holding the key, or on miss the bucket where the
    /// key would be inserted (the first tombstone of the chain if any, else the terminating empty
    /// bucket).
    fn probe(&self, hash: u64, key: &K) -> (Option<usize>, Option<usize>) {
        let capacity = self.buckets.len();
        if capacity == 0 {
            return (None, None);
        }

        let mut idx = (hash % capacity as u64) as usize;
        let mut first_free = None;

        for _ in 0..capacity {
            match &self.buckets[idx] {
                Bucket::Empty => {
                    return (None, Some(first_free.unwrap_or(idx)));
                }
                Bucket::Tombstone => {
                    if first_free.is_none() {
                        first_free = Some(idx);
                    }
                }
                Bucket::Occupied { hash: bhash, key: bkey, .. } => {
                    if *bhash == hash && bkey == key {
                        return (Some(idx), None);
                    }
                }
            }
            idx = (idx + 1) % capacity;
        }

        // The chain wrapped all the way around, every bucket occupied or tombstoned.
        (None, first_free)
    }

    /// Look up the slot for a key, for in-place inspection or insertion.
    pub fn entry<'map>(&'map mut self, key: K) -> Entry<'map, 'a, K, V, H> {
        let hash = self.hash_of(&key);
        match self.probe(hash, &key) {
            (Some(idx), _) => Entry::Occupied(OccupiedEntry { map: self, idx }),
            (None, Some(idx)) => Entry::Vacant(VacantEntry { map: self, idx, hash, key }),
            (None, None) => Entry::Full,
        }
    }

    /// Retrieve a value by key.
    pub fn get(&self, key: &K) -> Option<&V> {
        let hash = self.hash_of(key);
        let (idx, _) = self.probe(hash, key);
        match &self.buckets[idx?] {
            Bucket::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Retrieve a mutable value by key.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let hash = self.hash_of(key);
        let (idx, _) = self.probe(hash, key);
        match &mut self.buckets[idx?] {
            Bucket::Occupied { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Insert a value, replacing and returning the previous one under the same key.
    ///
    /// When the key is absent and the map is full, the input pair is handed back in the error.
    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, (K, V)> {
        let hash = self.hash_of(&key);
        match self.probe(hash, &key) {
            (Some(idx), _) => match &mut self.buckets[idx] {
                Bucket::Occupied { value: slot, .. } => Ok(Some(mem::replace(slot, value))),
                _ => unreachable!("probe hits are occupied buckets"),
            },
            (None, Some(idx)) => {
                self.buckets[idx] = Bucket::Occupied { hash, key, value };
                self.len += 1;
                Ok(None)
            }
            (None, None) => Err((key, value)),
        }
    }

    /// Remove an entry, returning its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let hash = self.hash_of(key);
        let (idx, _) = self.probe(hash, key);
        let bucket = mem::replace(&mut self.buckets[idx?], Bucket::Tombstone);
        match bucket {
            Bucket::Occupied { value, .. } => {
                self.len -= 1;
                Some(value)
            }
            // Unreachable, probe only reports occupied buckets as hits.
            other => {
                self.buckets[idx?] = other;
                None
            }
        }
    }
}

impl<'map, 'a, K, V, H> OccupiedEntry<'map, 'a, K, V, H> {
    /// The stored value.
    pub fn get(&self) -> &V {
        match &self.map.buckets[self.idx] {
            Bucket::Occupied { value, .. } => value,
            _ => unreachable!("entry index points at an occupied bucket"),
        }
    }

    /// The stored value, mutably.
    pub fn get_mut(&mut self) -> &mut V {
        match &mut self.map.buckets[self.idx] {
            Bucket::Occupied { value, .. } => value,
            _ => unreachable!("entry index points at an occupied bucket"),
        }
    }

    /// Convert into a reference bounded by the map borrow.
    pub fn into_mut(self) -> &'map mut V {
        match &mut self.map.buckets[self.idx] {
            Bucket::Occupied { value, .. } => value,
            _ => unreachable!("entry index points at an occupied bucket"),
        }
    }

    /// Remove the entry, returning the key and value.
    pub fn remove(self) -> (K, V) {
        let bucket = mem::replace(&mut self.map.buckets[self.idx], Bucket::Tombstone);
        match bucket {
            Bucket::Occupied { key, value, .. } => {
                self.map.len -= 1;
                (key, value)
            }
            _ => unreachable!("entry index points at an occupied bucket"),
        }
    }
}

impl<'map, 'a, K, V, H> VacantEntry<'map, 'a, K, V, H> {
    /// Fill the bucket with a value.
    pub fn insert(self, value: V) -> &'map mut V {
        self.map.buckets[self.idx] = Bucket::Occupied {
            hash: self.hash,
            key: self.key,
            value,
        };
        self.map.len += 1;

        match &mut self.map.buckets[self.idx] {
            Bucket::Occupied { value, .. } => value,
            _ => unreachable!("the bucket was just filled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::hash::BuildHasherDefault;
    use std::collections::hash_map::DefaultHasher;

    type Build = BuildHasherDefault<DefaultHasher>;

    fn fixed_map(buckets: &mut [Bucket<u32, u32>]) -> HashMap<'_, u32, u32, Build> {
        HashMap::new(Slice::Borrowed(buckets), Build::default())
    }

    #[test]
    fn insert_get_remove() {
        let mut buckets = vec![Bucket::Empty; 8];
        let mut map = fixed_map(&mut buckets);

        assert_eq!(map.insert(1, 10), Ok(None));
        assert_eq!(map.insert(2, 20), Ok(None));
        assert_eq!(map.insert(1, 11), Ok(Some(10)));

        assert_eq!(map.get(&1), Some(&11));
        assert_eq!(map.get(&2), Some(&20));
        assert_eq!(map.get(&3), None);
        assert_eq!(map.len(), 2);

        assert_eq!(map.remove(&1), Some(11));
        assert_eq!(map.get(&1), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn fills_up() {
        let mut buckets = vec![Bucket::Empty; 4];
        let mut map = fixed_map(&mut buckets);

        for key in 0..4 {
            assert!(map.insert(key, key).is_ok());
        }

        assert!(matches!(map.entry(99), Entry::Full));
        // Replacement of a present key still works at capacity.
        assert_eq!(map.insert(2, 22), Ok(Some(2)));
    }

    #[test]
    fn tombstone_reuse() {
        let mut buckets = vec![Bucket::Empty; 4];
        let mut map = fixed_map(&mut buckets);

        for key in 0..4 {
            assert!(map.insert(key, key).is_ok());
        }
        assert_eq!(map.remove(&1), Some(1));

        // The freed bucket is available again and chains over it stay reachable.
        assert!(map.insert(7, 70).is_ok());
        for key in [0u32, 2, 3].iter() {
            assert_eq!(map.get(key), Some(key));
        }
        assert_eq!(map.get(&7), Some(&70));
    }

    #[test]
    fn entry_api() {
        let mut buckets = vec![Bucket::Empty; 8];
        let mut map = fixed_map(&mut buckets);

        match map.entry(5) {
            Entry::Vacant(vacant) => {
                *vacant.insert(50) += 1;
            }
            _ => panic!("new key must be vacant"),
        }

        match map.entry(5) {
            Entry::Occupied(occupied) => {
                assert_eq!(*occupied.get(), 51);
                assert_eq!(occupied.remove(), (5, 51));
            }
            _ => panic!("key must be occupied"),
        }

        assert!(map.is_empty());
    }
}
