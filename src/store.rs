use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

/// Attribute value: the store speaks strings, signed integers, and string sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attr {
    S(String),
    N(i64),
    Ss(Vec<String>),
}

impl Attr {
    pub fn s(val: impl Into<String>) -> Self {
        Attr::S(val.into())
    }

    pub fn n(val: i64) -> Self {
        Attr::N(val)
    }

    pub fn ss(val: Vec<String>) -> Self {
        Attr::Ss(val)
    }

    pub fn as_s(&self) -> Option<&str> {
        match self {
            Attr::S(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_n(&self) -> Option<i64> {
        match self {
            Attr::N(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ss(&self) -> Option<&[String]> {
        match self {
            Attr::Ss(v) => Some(v),
            _ => None,
        }
    }
}

/// A flat item: attribute name → value.
pub type Item = HashMap<String, Attr>;

/// Composite key: partition prefix + sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub partition: String,
    pub sort: String,
}

impl Key {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    /// A guarded write observed an attribute that no longer matches.
    PreconditionFailed,
    /// An item is missing an attribute or holds one of the wrong type.
    Malformed(&'static str),
    /// Transport or backend failure.
    Backend(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::PreconditionFailed => write!(f, "precondition failed"),
            StoreError::Malformed(what) => write!(f, "malformed item: {what}"),
            StoreError::Backend(e) => write!(f, "store backend error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Contract with the key-value store. Per-item conditional writes are assumed
/// linearizable; that assumption is the only synchronization primitive the
/// rest of the crate builds on.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError>;

    async fn put(&self, key: &Key, item: Item) -> Result<(), StoreError>;

    /// Write `attrs` only if every attribute in `expected` currently holds
    /// the given value. A missing item fails the precondition.
    async fn update_guarded(
        &self,
        key: &Key,
        attrs: Item,
        expected: Item,
    ) -> Result<(), StoreError>;

    /// Atomically add `delta` to a numeric attribute and return the new
    /// value. Creates the item and the attribute when absent.
    async fn increment(&self, key: &Key, attr: &str, delta: i64) -> Result<i64, StoreError>;

    /// All items under a partition whose attributes equal every `(name,
    /// value)` pair in `filter`, ordered by sort key.
    async fn query(
        &self,
        partition: &str,
        filter: &[(&str, Attr)],
    ) -> Result<Vec<Item>, StoreError>;
}

// ── In-memory backend ────────────────────────────────────

/// Bundled store backend. Each conditional write runs while holding the
/// map entry for its key, which gives the per-item linearizability the
/// `Store` contract requires.
pub struct MemoryStore {
    items: DashMap<Key, Item>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &Key) -> Result<Option<Item>, StoreError> {
        Ok(self.items.get(key).map(|e| e.value().clone()))
    }

    async fn put(&self, key: &Key, item: Item) -> Result<(), StoreError> {
        self.items.insert(key.clone(), item);
        Ok(())
    }

    async fn update_guarded(
        &self,
        key: &Key,
        attrs: Item,
        expected: Item,
    ) -> Result<(), StoreError> {
        let mut entry = match self.items.get_mut(key) {
            Some(entry) => entry,
            None => return Err(StoreError::PreconditionFailed),
        };
        let stored = entry.value_mut();
        for (name, want) in &expected {
            if stored.get(name) != Some(want) {
                return Err(StoreError::PreconditionFailed);
            }
        }
        stored.extend(attrs);
        Ok(())
    }

    async fn increment(&self, key: &Key, attr: &str, delta: i64) -> Result<i64, StoreError> {
        let mut entry = self.items.entry(key.clone()).or_default();
        let item = entry.value_mut();
        match item.get_mut(attr) {
            Some(Attr::N(n)) => {
                *n += delta;
                Ok(*n)
            }
            Some(_) => Err(StoreError::Malformed("increment on non-numeric attribute")),
            None => {
                item.insert(attr.to_string(), Attr::N(delta));
                Ok(delta)
            }
        }
    }

    async fn query(
        &self,
        partition: &str,
        filter: &[(&str, Attr)],
    ) -> Result<Vec<Item>, StoreError> {
        let mut hits: Vec<(String, Item)> = self
            .items
            .iter()
            .filter(|e| e.key().partition == partition)
            .filter(|e| {
                filter
                    .iter()
                    .all(|(name, want)| e.value().get(*name) == Some(want))
            })
            .map(|e| (e.key().sort.clone(), e.value().clone()))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits.into_iter().map(|(_, item)| item).collect())
    }
}
