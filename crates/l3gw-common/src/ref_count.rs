//! Reference counts for shared device state.
//!
//! Several routes can derive the same device rule or static route. The
//! device object is installed when its count goes 0 -> 1 and removed when
//! it goes 1 -> 0. Lookups never create entries; releasing an unknown key
//! is an error rather than an underflow.

use std::collections::HashMap;
use std::hash::Hash;

use thiserror::Error;

/// Error type for [`RefCounts`] operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefCountError {
    #[error("Key not found")]
    KeyNotFound,
}

/// Counted set of keys.
#[derive(Debug, Clone)]
pub struct RefCounts<K> {
    inner: HashMap<K, u32>,
}

impl<K> RefCounts<K>
where
    K: Eq + Hash,
{
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Adds one reference and returns the new count.
    pub fn acquire(&mut self, key: K) -> u32 {
        let count = self.inner.entry(key).or_insert(0);
        *count += 1;
        *count
    }

    /// Drops one reference and returns the remaining count. The entry is
    /// removed when it reaches zero.
    pub fn release(&mut self, key: &K) -> Result<u32, RefCountError> {
        let count = self.inner.get_mut(key).ok_or(RefCountError::KeyNotFound)?;
        *count -= 1;
        let remaining = *count;
        if remaining == 0 {
            self.inner.remove(key);
        }
        Ok(remaining)
    }

    /// Current count, zero if absent.
    pub fn count(&self, key: &K) -> u32 {
        self.inner.get(key).copied().unwrap_or(0)
    }

    /// Returns true if the key holds at least one reference.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if no key is held.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over held keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }

    /// Forgets every key.
    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl<K> Default for RefCounts<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release() {
        let mut counts = RefCounts::new();
        assert_eq!(counts.acquire("rule"), 1);
        assert_eq!(counts.acquire("rule"), 2);
        assert_eq!(counts.release(&"rule"), Ok(1));
        assert!(counts.contains(&"rule"));
        assert_eq!(counts.release(&"rule"), Ok(0));
        assert!(!counts.contains(&"rule"));
        assert!(counts.is_empty());
    }

    #[test]
    fn test_release_unknown_key() {
        let mut counts: RefCounts<&str> = RefCounts::new();
        assert_eq!(counts.release(&"missing"), Err(RefCountError::KeyNotFound));
        assert_eq!(counts.count(&"missing"), 0);
        assert!(counts.is_empty());
    }
}
