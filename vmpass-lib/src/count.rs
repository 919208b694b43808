use std::sync::{
  Arc,
  atomic::{AtomicUsize, Ordering},
};

#[derive(Debug, Clone, Default)]
/// Counter for serving connections, shared by all TCP proxies of the listener
pub struct ConnectionCount(Arc<AtomicUsize>);

impl ConnectionCount {
  pub fn current(&self) -> usize {
    self.0.load(Ordering::Relaxed)
  }

  /// Take a slot unless `max` slots are already taken
  pub(crate) fn try_acquire(&self, max: usize) -> Option<ConnectionGuard> {
    self
      .0
      .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |count| (count < max).then_some(count + 1))
      .ok()
      .map(|_| ConnectionGuard(self.clone()))
  }

  fn decrement(&self) -> usize {
    let mut count;
    while {
      count = self.0.load(Ordering::Relaxed);
      count > 0
        && self
          .0
          .compare_exchange(count, count - 1, Ordering::Relaxed, Ordering::Relaxed)
          != Ok(count)
    } {}
    count
  }
}

/// Slot held for the lifetime of a connection task, released on drop whatever the exit path
#[derive(Debug)]
pub(crate) struct ConnectionGuard(ConnectionCount);

impl Drop for ConnectionGuard {
  fn drop(&mut self) {
    self.0.decrement();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_connection_count_basic() {
    let count = ConnectionCount::default();
    assert_eq!(count.current(), 0);

    let first = count.try_acquire(2).unwrap();
    assert_eq!(count.current(), 1);

    let second = count.try_acquire(2).unwrap();
    assert_eq!(count.current(), 2);

    // Limit reached
    assert!(count.try_acquire(2).is_none());
    assert_eq!(count.current(), 2);

    drop(first);
    assert_eq!(count.current(), 1);
    drop(second);
    assert_eq!(count.current(), 0);
  }

  #[test]
  fn test_connection_count_shared() {
    let count = ConnectionCount::default();
    let cloned = count.clone();

    // Simulate multiple connections over time
    for _ in 0..5 {
      let _guard = cloned.try_acquire(1).unwrap();
      assert_eq!(count.current(), 1);
    }
    assert_eq!(count.current(), 0);
  }
}
