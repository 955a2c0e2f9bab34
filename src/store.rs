// src/store.rs

//! Thread-safe keyed mapping guarded by [`crate::rwlock::RwLock`].

use crate::rwlock::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// A keyed mapping whose every access serializes through a
/// writer-priority lock. Cloned out for callers rather than returning
/// references, since the lock is released as soon as the accessor
/// method returns.
pub struct Store<K, V> {
    lock: RwLock,
    map: tokio::sync::Mutex<HashMap<K, V>>,
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            lock: RwLock::new(),
            map: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.lock.read_acquire().await;
        let value = self.map.lock().await.get(key).cloned();
        self.lock.read_release().await;
        value
    }

    pub async fn set(&self, key: K, value: V) {
        self.lock.write_acquire().await;
        self.map.lock().await.insert(key, value);
        self.lock.write_release().await;
    }

    pub async fn delete(&self, key: &K) -> Option<V> {
        self.lock.write_acquire().await;
        let removed = self.map.lock().await.remove(key);
        self.lock.write_release().await;
        removed
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.lock.read_acquire().await;
        let present = self.map.lock().await.contains_key(key);
        self.lock.read_release().await;
        present
    }

    /// Snapshot of current keys, safe to read without holding the lock.
    pub async fn keys(&self) -> Vec<K> {
        self.lock.read_acquire().await;
        let keys = self.map.lock().await.keys().cloned().collect();
        self.lock.read_release().await;
        keys
    }

    /// Snapshot of current entries, safe to read without holding the lock.
    pub async fn items(&self) -> Vec<(K, V)> {
        self.lock.read_acquire().await;
        let items = self
            .map
            .lock()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.lock.read_release().await;
        items
    }

    pub async fn update(&self, entries: HashMap<K, V>) {
        self.lock.write_acquire().await;
        self.map.lock().await.extend(entries);
        self.lock.write_release().await;
    }

    /// Takes the write side of the lock for the whole closure so the
    /// caller may mutate (e.g. delete zombies) while scanning.
    pub async fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&K, &V) -> bool,
    {
        self.lock.write_acquire().await;
        self.map.lock().await.retain(|k, v| keep(k, v));
        self.lock.write_release().await;
    }
}

impl<K, V> Default for Store<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let store: Store<String, i32> = Store::new();
        store.set("a".into(), 1).await;
        assert_eq!(store.get(&"a".to_string()).await, Some(1));
        assert!(store.contains(&"a".to_string()).await);
        store.delete(&"a".to_string()).await;
        assert_eq!(store.get(&"a".to_string()).await, None);
    }

    #[tokio::test]
    async fn retain_removes_matching() {
        let store: Store<String, i32> = Store::new();
        store.set("a".into(), 1).await;
        store.set("b".into(), 2).await;
        store.retain(|_, v| *v != 2).await;
        let keys = store.keys().await;
        assert_eq!(keys, vec!["a".to_string()]);
    }
}
