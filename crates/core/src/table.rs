//! Chained-bucket hash table.
//!
//! One table implementation serves three key shapes: dictionary keys
//! (string objects with cached bytes), interner keys (literal bytes),
//! and the compiler's identifier keys. The caller supplies the hash and
//! an equality closure, so keys never need to implement `Hash`/`Eq`
//! themselves, which matters for keys whose bytes live behind heap
//! handles.
//!
//! Buckets grow when the entry count exceeds the bucket count, doubling
//! the power-of-two capacity. Iteration order is bucket order, then
//! insertion order within a bucket, which keeps listings deterministic
//! for a given insertion sequence.

struct Entry<K, V> {
    hash: u32,
    key: K,
    value: V,
}

pub struct Table<K, V> {
    buckets: Vec<Vec<Entry<K, V>>>,
    len: usize,
}

impl<K, V> Table<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(8)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Table {
            buckets: (0..capacity.next_power_of_two().max(1))
                .map(|_| Vec::new())
                .collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    /// Insert `key`, replacing (and returning) the value of an existing
    /// entry that matches `hash` and `eq`.
    pub fn insert(
        &mut self,
        hash: u32,
        key: K,
        value: V,
        mut eq: impl FnMut(&K) -> bool,
    ) -> Option<V> {
        let index = self.bucket(hash);
        for entry in &mut self.buckets[index] {
            if entry.hash == hash && eq(&entry.key) {
                return Some(std::mem::replace(&mut entry.value, value));
            }
        }

        if self.len + 1 > self.buckets.len() {
            self.grow();
        }
        let index = self.bucket(hash);
        self.buckets[index].push(Entry { hash, key, value });
        self.len += 1;
        None
    }

    pub fn get(&self, hash: u32, mut eq: impl FnMut(&K) -> bool) -> Option<&V> {
        self.buckets[self.bucket(hash)]
            .iter()
            .find(|entry| entry.hash == hash && eq(&entry.key))
            .map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, hash: u32, mut eq: impl FnMut(&K) -> bool) -> Option<&mut V> {
        let index = self.bucket(hash);
        self.buckets[index]
            .iter_mut()
            .find(|entry| entry.hash == hash && eq(&entry.key))
            .map(|entry| &mut entry.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.iter().map(|entry| (&entry.key, &entry.value)))
    }

    /// Drop every entry for which `keep` returns false.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &V) -> bool) {
        for bucket in &mut self.buckets {
            bucket.retain(|entry| keep(&entry.key, &entry.value));
        }
        self.len = self.buckets.iter().map(Vec::len).sum();
    }

    fn grow(&mut self) {
        let new_capacity = self.buckets.len() * 2;
        let old = std::mem::replace(
            &mut self.buckets,
            (0..new_capacity).map(|_| Vec::new()).collect(),
        );
        for bucket in old {
            for entry in bucket {
                let index = entry.hash as usize & (new_capacity - 1);
                self.buckets[index].push(entry);
            }
        }
    }
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for Table<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// djb2 over a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 5381;
    for &byte in bytes {
        hash = hash.wrapping_mul(33) ^ u32::from(byte);
    }
    hash
}
