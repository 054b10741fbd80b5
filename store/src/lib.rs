//! Backing-store interface for content-addressed node storage.
//!
//! The trie engine talks to its persistence layer exclusively through
//! [`KeyValueStore`]: a byte-oriented map from 32-byte digests to encoded
//! node payloads, with buffered writes that become durable on [`commit`].
//! [`MemoryStore`] is the in-process implementation used by tests and by
//! anything that wants a throwaway trie; real deployments implement the
//! trait over their own storage engine.
//!
//! [`commit`]: KeyValueStore::commit

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors surfaced by a backing store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested key has no entry.
    #[error("key not found in backing store")]
    NotFound,
    /// The underlying storage engine failed.
    #[error("backing store failure: {0}")]
    Backend(String),
}

/// A byte-oriented key-value store keyed by 32-byte digests.
///
/// Writes are allowed to buffer; [`commit`](Self::commit) makes everything
/// issued so far durable. Reads observe buffered writes. Handles are shared
/// (`&self` receivers), so implementations provide their own interior
/// locking.
pub trait KeyValueStore {
    /// Fetches the value stored under `key`, or [`StoreError::NotFound`].
    fn get(&self, key: &[u8; 32]) -> Result<Vec<u8>, StoreError>;

    /// Stages `value` under `key`, replacing any previous entry.
    fn put(&self, key: [u8; 32], value: Vec<u8>) -> Result<(), StoreError>;

    /// Stages removal of `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8; 32]) -> Result<(), StoreError>;

    /// Returns whether `key` currently resolves to a value.
    fn contains(&self, key: &[u8; 32]) -> Result<bool, StoreError>;

    /// Makes all staged operations durable.
    fn commit(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct Inner {
    committed: HashMap<[u8; 32], Vec<u8>>,
    /// Staged operations; `None` marks a staged deletion. Later operations
    /// on the same key replace earlier ones.
    pending: HashMap<[u8; 32], Option<Vec<u8>>>,
}

/// In-memory [`KeyValueStore`] with write buffering.
///
/// Cloning yields another handle onto the same storage, so a caller can keep
/// a handle for inspection while the trie owns its own.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of durable entries.
    pub fn committed_len(&self) -> usize {
        self.lock_inner().committed.len()
    }

    /// Number of staged, not-yet-committed operations.
    pub fn pending_len(&self) -> usize {
        self.lock_inner().pending.len()
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("store mutex poisoned")
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &[u8; 32]) -> Result<Vec<u8>, StoreError> {
        let inner = self.locked()?;
        match inner.pending.get(key) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(StoreError::NotFound),
            None => inner.committed.get(key).cloned().ok_or(StoreError::NotFound),
        }
    }

    fn put(&self, key: [u8; 32], value: Vec<u8>) -> Result<(), StoreError> {
        self.locked()?.pending.insert(key, Some(value));
        Ok(())
    }

    fn delete(&self, key: &[u8; 32]) -> Result<(), StoreError> {
        self.locked()?.pending.insert(*key, None);
        Ok(())
    }

    fn contains(&self, key: &[u8; 32]) -> Result<bool, StoreError> {
        let inner = self.locked()?;
        Ok(match inner.pending.get(key) {
            Some(staged) => staged.is_some(),
            None => inner.committed.contains_key(key),
        })
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.locked()?;
        let staged: Vec<_> = inner.pending.drain().collect();
        for (key, op) in staged {
            match op {
                Some(value) => {
                    inner.committed.insert(key, value);
                }
                None => {
                    inner.committed.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tag: u8) -> [u8; 32] {
        [tag; 32]
    }

    #[test]
    fn staged_writes_are_readable_before_commit() {
        let store = MemoryStore::new();
        store.put(key(1), vec![0xaa]).unwrap();
        assert_eq!(store.get(&key(1)).unwrap(), vec![0xaa]);
        assert!(store.contains(&key(1)).unwrap());
        assert_eq!(store.committed_len(), 0);
        assert_eq!(store.pending_len(), 1);
    }

    #[test]
    fn commit_drains_the_buffer() {
        let store = MemoryStore::new();
        store.put(key(1), vec![0xaa]).unwrap();
        store.put(key(2), vec![0xbb]).unwrap();
        store.commit().unwrap();
        assert_eq!(store.committed_len(), 2);
        assert_eq!(store.pending_len(), 0);
        assert_eq!(store.get(&key(2)).unwrap(), vec![0xbb]);
    }

    #[test]
    fn staged_delete_shadows_committed_entry() {
        let store = MemoryStore::new();
        store.put(key(1), vec![0xaa]).unwrap();
        store.commit().unwrap();

        store.delete(&key(1)).unwrap();
        assert_eq!(store.get(&key(1)), Err(StoreError::NotFound));
        assert!(!store.contains(&key(1)).unwrap());

        store.commit().unwrap();
        assert_eq!(store.committed_len(), 0);
    }

    #[test]
    fn later_operations_replace_earlier_ones_in_a_batch() {
        let store = MemoryStore::new();
        store.put(key(1), vec![0xaa]).unwrap();
        store.delete(&key(1)).unwrap();
        store.commit().unwrap();
        assert!(!store.contains(&key(1)).unwrap());

        store.delete(&key(2)).unwrap();
        store.put(key(2), vec![0xbb]).unwrap();
        store.commit().unwrap();
        assert_eq!(store.get(&key(2)).unwrap(), vec![0xbb]);
    }

    #[test]
    fn clones_share_storage() {
        let store = MemoryStore::new();
        let handle = store.clone();
        store.put(key(7), vec![1, 2, 3]).unwrap();
        assert_eq!(handle.get(&key(7)).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn deleting_absent_keys_is_a_no_op() {
        let store = MemoryStore::new();
        store.delete(&key(9)).unwrap();
        store.commit().unwrap();
        assert_eq!(store.committed_len(), 0);
    }
}
