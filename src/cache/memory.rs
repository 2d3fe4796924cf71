//! Cost-bounded LRU map for the in-memory tier.
//!
//! Nodes live in a slab and are linked by index, so `get`, `insert` and
//! `remove` are O(1) on average.

use std::collections::HashMap;

#[derive(Debug)]
struct Node<V> {
  key: String,
  value: V,
  cost: usize,
  prev: Option<usize>,
  next: Option<usize>,
}

#[derive(Debug)]
pub struct MemoryTier<V> {
  index: HashMap<String, usize>,
  slots: Vec<Option<Node<V>>>,
  free: Vec<usize>,
  /// Most recently used.
  head: Option<usize>,
  /// Least recently used.
  tail: Option<usize>,
  total_cost: usize,
  /// Zero means unbounded.
  max_cost: usize,
}

impl<V> MemoryTier<V> {
  pub fn new(max_cost: usize) -> Self {
    Self {
      index: HashMap::new(),
      slots: Vec::new(),
      free: Vec::new(),
      head: None,
      tail: None,
      total_cost: 0,
      max_cost,
    }
  }

  pub fn len(&self) -> usize {
    self.index.len()
  }

  pub fn is_empty(&self) -> bool {
    self.index.is_empty()
  }

  pub fn total_cost(&self) -> usize {
    self.total_cost
  }

  pub fn contains(&self, key: &str) -> bool {
    self.index.contains_key(key)
  }

  /// Look up `key` and mark it most recently used.
  pub fn get(&mut self, key: &str) -> Option<&V> {
    let slot = *self.index.get(key)?;
    self.unlink(slot);
    self.push_front(slot);
    self.slots[slot].as_ref().map(|node| &node.value)
  }

  /// Insert or replace `key`, then evict least recently used entries until the
  /// total cost fits. An entry costing more than the whole budget is dropped.
  pub fn insert(&mut self, key: String, value: V, cost: usize) {
    self.remove(&key);

    if self.max_cost > 0 && cost > self.max_cost {
      return;
    }

    let node = Node {
      key: key.clone(),
      value,
      cost,
      prev: None,
      next: None,
    };
    let slot = match self.free.pop() {
      Some(slot) => {
        self.slots[slot] = Some(node);
        slot
      }
      None => {
        self.slots.push(Some(node));
        self.slots.len() - 1
      }
    };
    self.index.insert(key, slot);
    self.push_front(slot);
    self.total_cost += cost;

    while self.max_cost > 0 && self.total_cost > self.max_cost {
      match self.tail {
        Some(tail) => {
          self.evict_slot(tail);
        }
        None => break,
      }
    }
  }

  pub fn remove(&mut self, key: &str) -> Option<V> {
    let slot = *self.index.get(key)?;
    self.evict_slot(slot)
  }

  pub fn clear(&mut self) {
    self.index.clear();
    self.slots.clear();
    self.free.clear();
    self.head = None;
    self.tail = None;
    self.total_cost = 0;
  }

  fn evict_slot(&mut self, slot: usize) -> Option<V> {
    self.unlink(slot);
    let node = self.slots[slot].take()?;
    self.index.remove(&node.key);
    self.free.push(slot);
    self.total_cost -= node.cost;
    Some(node.value)
  }

  fn unlink(&mut self, slot: usize) {
    let (prev, next) = match self.slots[slot].as_ref() {
      Some(node) => (node.prev, node.next),
      None => return,
    };

    match prev {
      Some(p) => {
        if let Some(node) = self.slots[p].as_mut() {
          node.next = next;
        }
      }
      None => {
        if self.head == Some(slot) {
          self.head = next;
        }
      }
    }
    match next {
      Some(n) => {
        if let Some(node) = self.slots[n].as_mut() {
          node.prev = prev;
        }
      }
      None => {
        if self.tail == Some(slot) {
          self.tail = prev;
        }
      }
    }

    if let Some(node) = self.slots[slot].as_mut() {
      node.prev = None;
      node.next = None;
    }
  }

  fn push_front(&mut self, slot: usize) {
    let old_head = self.head;
    if let Some(node) = self.slots[slot].as_mut() {
      node.prev = None;
      node.next = old_head;
    }
    if let Some(h) = old_head {
      if let Some(node) = self.slots[h].as_mut() {
        node.prev = Some(slot);
      }
    }
    self.head = Some(slot);
    if self.tail.is_none() {
      self.tail = Some(slot);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_insert_and_get() {
    let mut tier = MemoryTier::new(0);
    tier.insert("a".into(), 1, 10);
    tier.insert("b".into(), 2, 10);
    assert_eq!(tier.get("a"), Some(&1));
    assert_eq!(tier.get("b"), Some(&2));
    assert_eq!(tier.get("c"), None);
    assert_eq!(tier.total_cost(), 20);
  }

  #[test]
  fn test_replace_updates_cost() {
    let mut tier = MemoryTier::new(100);
    tier.insert("a".into(), 1, 10);
    tier.insert("a".into(), 2, 30);
    assert_eq!(tier.len(), 1);
    assert_eq!(tier.total_cost(), 30);
    assert_eq!(tier.get("a"), Some(&2));
  }

  #[test]
  fn test_evicts_least_recently_used_over_budget() {
    let mut tier = MemoryTier::new(30);
    tier.insert("a".into(), 1, 10);
    tier.insert("b".into(), 2, 10);
    tier.insert("c".into(), 3, 10);

    // Touch "a" so "b" becomes the oldest
    assert!(tier.get("a").is_some());

    tier.insert("d".into(), 4, 10);
    assert!(!tier.contains("b"));
    assert!(tier.contains("a"));
    assert!(tier.contains("c"));
    assert!(tier.contains("d"));
    assert_eq!(tier.total_cost(), 30);
  }

  #[test]
  fn test_large_insert_evicts_several() {
    let mut tier = MemoryTier::new(30);
    tier.insert("a".into(), 1, 10);
    tier.insert("b".into(), 2, 10);
    tier.insert("c".into(), 3, 10);
    tier.insert("big".into(), 4, 25);
    assert_eq!(tier.len(), 1);
    assert!(tier.contains("big"));
  }

  #[test]
  fn test_entry_larger_than_budget_is_not_kept() {
    let mut tier = MemoryTier::new(10);
    tier.insert("a".into(), 1, 5);
    tier.insert("huge".into(), 2, 11);
    assert!(!tier.contains("huge"));
    assert!(tier.contains("a"));
  }

  #[test]
  fn test_remove_and_reuse_slots() {
    let mut tier = MemoryTier::new(0);
    tier.insert("a".into(), 1, 1);
    tier.insert("b".into(), 2, 1);
    assert_eq!(tier.remove("a"), Some(1));
    assert_eq!(tier.remove("a"), None);
    tier.insert("c".into(), 3, 1);
    assert_eq!(tier.len(), 2);
    assert_eq!(tier.get("b"), Some(&2));
    assert_eq!(tier.get("c"), Some(&3));
    assert_eq!(tier.total_cost(), 2);
  }

  #[test]
  fn test_clear() {
    let mut tier = MemoryTier::new(0);
    tier.insert("a".into(), 1, 1);
    tier.clear();
    assert!(tier.is_empty());
    assert_eq!(tier.total_cost(), 0);
    tier.insert("b".into(), 2, 1);
    assert_eq!(tier.get("b"), Some(&2));
  }
}
