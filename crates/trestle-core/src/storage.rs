//! Opaque key-value persistence consumed by the chain store.
//!
//! The core never depends on a specific storage engine; anything providing
//! `get`/`put` and an atomic batch write can back it. Engine errors are
//! opaque to the core and surface as `anyhow::Error`.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::types::Hash256;

/// A byte-addressed key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`.
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>>;

    /// Store `value` under `key`.
    fn put(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()>;

    /// Apply all writes atomically: either every pair lands or none does.
    fn write_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> anyhow::Result<()>;
}

/// Key of a stored header: `h` ++ big-endian number ++ hash.
pub fn header_key(number: u64, hash: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 32);
    key.push(b'h');
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

/// Key of a stored total difficulty: `t` ++ big-endian number ++ hash.
pub fn td_key(number: u64, hash: &Hash256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 32);
    key.push(b't');
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

/// Key of the canonical hash at a number: `c` ++ big-endian number.
pub fn canonical_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8);
    key.push(b'c');
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// Key of the head pointer.
pub fn head_key() -> Vec<u8> {
    vec![b'H']
}

/// In-memory [`KeyValueStore`], used in tests and as a stand-in engine.
#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8]) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> anyhow::Result<()> {
        self.map.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn write_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> anyhow::Result<()> {
        let mut map = self.map.write();
        for (key, value) in batch {
            map.insert(key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get(b"missing").unwrap().is_none());
        store.put(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_write_batch() {
        let store = MemoryStore::new();
        store
            .write_batch(vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())])
            .unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_key_layouts_are_disjoint() {
        let hash = [0xAA; 32];
        assert_ne!(header_key(1, &hash), td_key(1, &hash));
        assert_ne!(canonical_key(1), head_key());
        // Big-endian numbers keep lexicographic order aligned with height.
        assert!(canonical_key(1) < canonical_key(2));
        assert!(canonical_key(255) < canonical_key(256));
    }
}
