//! # Bounded LRU correlation cache.
//!
//! Maps in-flight request ids (and optionally a unit-of-work id) to the channel that
//! originated them, so broadcast events can be attributed to their origin.
//!
//! ## Layout
//! ```text
//! by_id:   message_id ──► slot ─┐
//! by_unit: unit_id ──► message_id
//!                               ▼
//! slots:   [node] ⇄ [node] ⇄ [node] ⇄ [node]
//!          head (LRU)                tail (MRU)
//! ```
//!
//! ## Rules
//! - Every `put` and every `get` moves the entry to the MRU end.
//! - Exceeding the capacity evicts exactly one entry: the LRU one, with its unit mapping.
//! - At most one entry per unit-of-work id: a new message id for the same unit evicts the old entry.
//! - A rejected `put` leaves the cache unchanged.
//! - Lookups by either key are O(1).

use std::collections::HashMap;

use crate::cache::CacheEntry;
use crate::error::CacheError;

/// Lookup key: a message id or a unit-of-work id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKey<'a> {
    MessageId(&'a str),
    UnitOfWork(&'a str),
}

struct Node {
    entry: CacheEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU cache of [`CacheEntry`] keyed by message id, with a unit-of-work secondary index.
pub struct CorrelationCache {
    capacity: usize,
    by_id: HashMap<String, usize>,
    by_unit: HashMap<String, String>,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl CorrelationCache {
    /// Creates an empty cache holding at most `capacity` entries (min 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_id: HashMap::new(),
            by_unit: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Inserts or updates the entry stored under `key`.
    ///
    /// ### Errors
    /// - [`CacheError::MissingField`] when `message_id` is empty or `channel` is `None`
    /// - [`CacheError::KeyMismatch`] when `key` differs from `entry.message_id`
    pub fn put(&mut self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        if entry.message_id.is_empty() {
            return Err(CacheError::MissingField {
                field: "message_id",
            });
        }
        if entry.channel.is_none() {
            return Err(CacheError::MissingField { field: "channel" });
        }
        if entry.message_id != key {
            return Err(CacheError::KeyMismatch {
                key: key.to_string(),
                message_id: entry.message_id,
            });
        }

        if let Some(unit) = entry.unit_of_work_id.as_deref() {
            let stale = self
                .by_unit
                .get(unit)
                .filter(|existing| existing.as_str() != key)
                .cloned();
            if let Some(stale) = stale {
                self.remove_id(&stale);
            }
        }

        let unit = entry.unit_of_work_id.clone();
        match self.by_id.get(key).copied() {
            Some(idx) => {
                let old_unit = self.node_mut(idx).and_then(|n| {
                    std::mem::replace(&mut n.entry, entry).unit_of_work_id
                });
                if let Some(old_unit) = old_unit.filter(|u| Some(u) != unit.as_ref()) {
                    self.unlink_unit(&old_unit, key);
                }
                self.detach(idx);
                self.push_back(idx);
            }
            None => {
                let idx = self.alloc(entry);
                self.by_id.insert(key.to_string(), idx);
                self.push_back(idx);
            }
        }
        if let Some(unit) = unit {
            self.by_unit.insert(unit, key.to_string());
        }

        if self.by_id.len() > self.capacity {
            self.evict_oldest();
        }
        Ok(())
    }

    /// Inserts `entry` under its own message id.
    pub fn add(&mut self, entry: CacheEntry) -> Result<(), CacheError> {
        let key = entry.message_id.clone();
        self.put(&key, entry)
    }

    /// Returns the entry for `key` and marks it most recently used.
    pub fn get(&mut self, key: CacheKey<'_>) -> Option<&CacheEntry> {
        let idx = self.slot_of(key)?;
        self.detach(idx);
        self.push_back(idx);
        self.node(idx).map(|n| &n.entry)
    }

    /// Returns the entry for `key` without touching recency.
    pub fn peek(&self, key: CacheKey<'_>) -> Option<&CacheEntry> {
        self.slot_of(key)
            .and_then(|idx| self.node(idx))
            .map(|n| &n.entry)
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.by_id.contains_key(message_id)
    }

    /// Removes the entry for `key` along with both index mappings.
    ///
    /// Returns `false` if nothing was stored.
    pub fn remove(&mut self, key: CacheKey<'_>) -> bool {
        self.pop(key).is_some()
    }

    /// Removes and returns the entry for `key`.
    pub fn pop(&mut self, key: CacheKey<'_>) -> Option<CacheEntry> {
        let message_id = match key {
            CacheKey::MessageId(id) => id.to_string(),
            CacheKey::UnitOfWork(unit) => self.by_unit.get(unit)?.clone(),
        };
        self.remove_id(&message_id)
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_unit.clear();
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Message ids from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        let mut cur = self.head;
        std::iter::from_fn(move || {
            let node = self.node(cur?)?;
            cur = node.next;
            Some(node.entry.message_id.as_str())
        })
    }

    // ---------------------------
    // Internals
    // ---------------------------

    fn slot_of(&self, key: CacheKey<'_>) -> Option<usize> {
        match key {
            CacheKey::MessageId(id) => self.by_id.get(id).copied(),
            CacheKey::UnitOfWork(unit) => {
                let id = self.by_unit.get(unit)?;
                self.by_id.get(id).copied()
            }
        }
    }

    fn evict_oldest(&mut self) {
        let Some(idx) = self.head else { return };
        let Some(id) = self.node(idx).map(|n| n.entry.message_id.clone()) else {
            return;
        };
        self.remove_id(&id);
    }

    fn remove_id(&mut self, message_id: &str) -> Option<CacheEntry> {
        let idx = self.by_id.remove(message_id)?;
        self.detach(idx);
        let node = self.slots.get_mut(idx).and_then(Option::take)?;
        self.free.push(idx);
        if let Some(unit) = node.entry.unit_of_work_id.as_deref() {
            self.unlink_unit(unit, message_id);
        }
        Some(node.entry)
    }

    fn unlink_unit(&mut self, unit: &str, message_id: &str) {
        if self.by_unit.get(unit).map(String::as_str) == Some(message_id) {
            self.by_unit.remove(unit);
        }
    }

    fn alloc(&mut self, entry: CacheEntry) -> usize {
        let node = Node {
            entry,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn node(&self, idx: usize) -> Option<&Node> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.node(idx) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.node_mut(idx) {
            n.prev = None;
            n.next = None;
        }
    }

    fn push_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        if let Some(n) = self.node_mut(idx) {
            n.prev = old_tail;
            n.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(n) = self.node_mut(t) {
                    n.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }
}

impl std::fmt::Debug for CorrelationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}
