//! Flat entity tables.
//!
//! Positions, orders and allocations reference each other by id only. Each row sits behind
//! its own mutex so a sweep pass and a caller never process the same entity at once, while
//! different entities proceed in parallel.

use crate::engine::EngineError;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub struct EntityTable<K, V> {
    label: &'static str,
    rows: DashMap<K, Arc<Mutex<V>>>,
    next_id: AtomicU64,
}

impl<K, V> EntityTable<K, V>
where
    K: Copy + Eq + Hash + Ord + Debug,
    V: Clone,
{
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            rows: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn insert(&self, key: K, value: V) {
        self.rows.insert(key, Arc::new(Mutex::new(value)));
    }

    pub fn contains(&self, key: K) -> bool {
        self.rows.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn row(&self, key: K) -> Result<Arc<Mutex<V>>, EngineError> {
        self.rows
            .get(&key)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| EngineError::NotFound(format!("{} {:?}", self.label, key)))
    }

    /// Runs `f` with exclusive access to one row. Changes made by `f` stay even if it
    /// returns an error, so callers mutate only after every fallible step has passed.
    pub fn with<R>(&self, key: K, f: impl FnOnce(&mut V) -> Result<R, EngineError>) -> Result<R, EngineError> {
        let row = self.row(key)?;
        let mut guard = row.lock().map_err(|_| EngineError::StorageUnavailable)?;
        f(&mut guard)
    }

    pub fn get(&self, key: K) -> Result<V, EngineError> {
        self.with(key, |v| Ok(v.clone()))
    }

    /// Ids in ascending order.
    pub fn keys(&self) -> Vec<K> {
        let mut keys: Vec<K> = self.rows.iter().map(|r| *r.key()).collect();
        keys.sort();
        keys
    }

    /// Clones of every row matching `pred`, ordered by id.
    pub fn filter(&self, pred: impl Fn(&V) -> bool) -> Vec<V> {
        self.keys()
            .into_iter()
            .filter_map(|k| self.get(k).ok())
            .filter(|v| pred(v))
            .collect()
    }
}
