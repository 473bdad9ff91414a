use crate::task::QueuedItem;

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;

/// The ordered list of entries that have not been admitted yet.
///
/// Order is the only scheduling priority: the front entry is always the next
/// one to be admitted. Lookups by payload address the earliest matching entry.
pub(crate) struct WaitingList<T, R, E> {
  entries: VecDeque<QueuedItem<T, R, E>>,
}

impl<T, R, E> fmt::Debug for WaitingList<T, R, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WaitingList")
      .field("len", &self.entries.len())
      .field("front_entry_id", &self.entries.front().map(|e| e.entry_id))
      .finish()
  }
}

impl<T, R, E> WaitingList<T, R, E> {
  pub(crate) fn new() -> Self {
    Self { entries: VecDeque::new() }
  }

  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub(crate) fn push_back(&mut self, entry: QueuedItem<T, R, E>) {
    self.entries.push_back(entry);
  }

  pub(crate) fn push_front(&mut self, entry: QueuedItem<T, R, E>) {
    self.entries.push_front(entry);
  }

  pub(crate) fn pop_front(&mut self) -> Option<QueuedItem<T, R, E>> {
    self.entries.pop_front()
  }

  /// Reorders the entries by their payloads. Membership never changes.
  pub(crate) fn sort_by<F>(&mut self, mut compare: F)
  where
    F: FnMut(&T, &T) -> Ordering,
  {
    self
      .entries
      .make_contiguous()
      .sort_by(|a, b| compare(&a.item, &b.item));
  }

  /// Removes every entry, front to back.
  pub(crate) fn drain(&mut self) -> Vec<QueuedItem<T, R, E>> {
    self.entries.drain(..).collect()
  }
}

impl<T: PartialEq, R, E> WaitingList<T, R, E> {
  fn position(&self, item: &T) -> Option<usize> {
    self.entries.iter().position(|entry| entry.item == *item)
  }

  pub(crate) fn contains(&self, item: &T) -> bool {
    self.position(item).is_some()
  }

  pub(crate) fn find(&self, item: &T) -> Option<&QueuedItem<T, R, E>> {
    self.position(item).and_then(|index| self.entries.get(index))
  }

  /// Unlinks the earliest entry matching `item`.
  pub(crate) fn remove(&mut self, item: &T) -> Option<QueuedItem<T, R, E>> {
    let index = self.position(item)?;
    self.entries.remove(index)
  }
}

impl<T: Clone, R, E> WaitingList<T, R, E> {
  /// Copies the payloads in list order.
  pub(crate) fn snapshot(&self) -> Vec<T> {
    self.entries.iter().map(|entry| entry.item.clone()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handle::{ResultHandle, Settlement};

  fn dummy_entry(entry_id: u64, item: &'static str) -> (QueuedItem<&'static str, usize, ()>, ResultHandle<usize, ()>) {
    let (settlement, handle) = Settlement::new(entry_id);
    let entry = QueuedItem::new(entry_id, item, |item: &'static str| async move { Ok(item.len()) }, settlement);
    (entry, handle)
  }

  fn list_of(items: &[&'static str]) -> WaitingList<&'static str, usize, ()> {
    let mut list = WaitingList::new();
    for (index, item) in items.iter().enumerate() {
      list.push_back(dummy_entry(index as u64, item).0);
    }
    list
  }

  #[test]
  fn test_push_back_and_front_order() {
    let mut list = list_of(&["a", "b"]);
    list.push_front(dummy_entry(10, "c").0);
    assert_eq!(list.snapshot(), vec!["c", "a", "b"]);
    assert_eq!(list.len(), 3);

    let head = list.pop_front().unwrap();
    assert_eq!(head.entry_id, 10);
    assert_eq!(list.snapshot(), vec!["a", "b"]);
  }

  #[test]
  fn test_remove_takes_earliest_match_only() {
    let mut list = list_of(&["x", "y", "x"]);
    let removed = list.remove(&"x").unwrap();
    assert_eq!(removed.entry_id, 0);
    assert_eq!(list.snapshot(), vec!["y", "x"]);
    assert!(list.contains(&"x"));
    assert_eq!(list.find(&"x").map(|e| e.entry_id), Some(2));

    assert!(list.remove(&"missing").is_none());
    assert_eq!(list.len(), 2);
  }

  #[test]
  fn test_sort_reorders_without_changing_membership() {
    let mut list = list_of(&["delta", "alpha", "charlie", "bravo", "alpha"]);
    list.sort_by(|a, b| a.cmp(b));
    assert_eq!(list.snapshot(), vec!["alpha", "alpha", "bravo", "charlie", "delta"]);

    list.sort_by(|a, b| b.cmp(a));
    assert_eq!(list.snapshot(), vec!["delta", "charlie", "bravo", "alpha", "alpha"]);
    assert_eq!(list.len(), 5);
  }

  #[test]
  fn test_drain_empties_in_order() {
    let mut list = list_of(&["one", "two", "three"]);
    let drained: Vec<u64> = list.drain().into_iter().map(|e| e.entry_id).collect();
    assert_eq!(drained, vec![0, 1, 2]);
    assert!(list.is_empty());
    assert!(list.pop_front().is_none());
  }

  #[tokio::test]
  async fn test_entry_callback_runs_with_payload() {
    let (entry, handle) = dummy_entry(5, "hello");
    let outcome = (entry.callback)(entry.item).await;
    assert_eq!(outcome, Ok(5));
    entry.settlement.settle(outcome.map_err(crate::QueueError::Callback));
    assert_eq!(handle.await_result().await, Ok(5));
  }
}
