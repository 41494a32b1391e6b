//! In-process store with Redis-compatible semantics for the operations the
//! limiter uses. Expiry is driven by the tokio clock so paused-time tests can
//! step through windows.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{CounterRecord, KeyValueStore, Ttl};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }

    fn ttl(&self, now: Instant) -> Ttl {
        match self.expires_at {
            Some(at) => Ttl::Expires(at.saturating_duration_since(now)),
            None => Ttl::Persistent,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.is_live(now)).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Command("memory store lock poisoned".to_string()))?;
        let now = Instant::now();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(entries)
    }
}

fn as_int(key: &str, value: &Value) -> Result<i64, StoreError> {
    match value {
        Value::Int(v) => Ok(*v),
        Value::Text(_) => Err(StoreError::Command(format!(
            "value at '{}' is not an integer",
            key
        ))),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let entries = self.lock()?;
        entries.get(key).map(|e| as_int(key, &e.value)).transpose()
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: i64,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Int(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        let mut entries = self.lock()?;
        match entries.get_mut(key) {
            Some(entry) => {
                let next = as_int(key, &entry.value)? - 1;
                entry.value = Value::Int(next);
                Ok(next)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Int(-1),
                        expires_at: None,
                    },
                );
                Ok(-1)
            }
        }
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Ttl, StoreError> {
        let entries = self.lock()?;
        let now = Instant::now();
        Ok(entries.get(key).map_or(Ttl::Missing, |e| e.ttl(now)))
    }

    async fn snapshot(&self, key: &str) -> Result<CounterRecord, StoreError> {
        let entries = self.lock()?;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) => Ok(CounterRecord {
                remaining: Some(as_int(key, &entry.value)?),
                ttl: entry.ttl(now),
            }),
            None => Ok(CounterRecord {
                remaining: None,
                ttl: Ttl::Missing,
            }),
        }
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.lock()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.lock()?;
        let matches = matches!(
            entries.get(key),
            Some(Entry { value: Value::Text(current), .. }) if current == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_set_with_expiry_evicts() {
        let store = MemoryStore::new();
        store.set_with_expiry("k", 4, Duration::from_millis(500)).await.unwrap();

        let record = store.snapshot("k").await.unwrap();
        assert_eq!(record.remaining, Some(4));
        assert_eq!(record.ttl, Ttl::Expires(Duration::from_millis(500)));

        tokio::time::advance(Duration::from_millis(501)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.remaining_ttl("k").await.unwrap(), Ttl::Missing);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_decrement_keeps_expiry() {
        let store = MemoryStore::new();
        store.set_with_expiry("k", 1, Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_millis(300)).await;

        assert_eq!(store.decrement("k").await.unwrap(), 0);
        assert_eq!(store.decrement("k").await.unwrap(), -1);
        assert_eq!(
            store.remaining_ttl("k").await.unwrap(),
            Ttl::Expires(Duration::from_millis(700))
        );
    }

    #[tokio::test]
    async fn test_decrement_absent_key_is_persistent() {
        let store = MemoryStore::new();
        assert_eq!(store.decrement("fresh").await.unwrap(), -1);
        assert_eq!(store.remaining_ttl("fresh").await.unwrap(), Ttl::Persistent);
    }

    #[tokio::test]
    async fn test_set_if_absent_and_compare_delete() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(2);
        assert!(store.set_if_absent("lease", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lease", "b", ttl).await.unwrap());

        assert!(!store.delete_if_equals("lease", "b").await.unwrap());
        assert!(store.delete_if_equals("lease", "a").await.unwrap());
        assert!(!store.delete_if_equals("lease", "a").await.unwrap());
        assert!(store.set_if_absent("lease", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_text_value_is_not_a_counter() {
        let store = MemoryStore::new();
        store.set_if_absent("lease", "token", Duration::from_secs(1)).await.unwrap();
        assert!(matches!(store.get("lease").await, Err(StoreError::Command(_))));
        assert!(matches!(store.decrement("lease").await, Err(StoreError::Command(_))));
    }
}
