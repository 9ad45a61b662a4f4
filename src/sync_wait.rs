//! One-shot completion cells bridging the asynchronous device callbacks to
//! the blocking call surface.

use parking_lot::{Condvar, Mutex};

/// A single-use rendezvous between one blocked caller and the completion
/// callback that fulfils it.
///
/// Every synchronous call constructs its own waiter; concurrent blocking
/// callers must never share one, or a completion could wake the wrong call.
pub struct SyncWaiter<T> {
  slot: Mutex<Option<T>>,
  cv: Condvar,
}

impl<T> SyncWaiter<T> {
  pub fn new() -> Self {
    Self {
      slot: Mutex::new(None),
      cv: Condvar::new(),
    }
  }

  /// Deposits the result and wakes the waiter. Must be called exactly once.
  pub fn complete(&self, value: T) {
    let mut slot = self.slot.lock();
    *slot = Some(value);
    self.cv.notify_all();
  }

  /// Blocks until `complete` has deposited a value.
  pub fn wait(&self) -> T {
    let mut slot = self.slot.lock();
    loop {
      if let Some(value) = slot.take() {
        return value;
      }
      self.cv.wait(&mut slot);
    }
  }
}

impl<T> Default for SyncWaiter<T> {
  fn default() -> Self {
    Self::new()
  }
}
