//! Keyed background tasks owned by one screen.
//!
//! Every task is registered under a key. Starting a task under a key that is
//! already taken first aborts the previous task *and waits for it to stop*,
//! so two tasks of the same key never run side by side. Dropping the scope
//! aborts everything it still owns.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use tokio::task::JoinHandle;
use tracing::trace;

pub struct TaskScope<K> {
  tasks: HashMap<K, JoinHandle<()>>,
}

impl<K> Default for TaskScope<K> {
  fn default() -> Self {
    Self {
      tasks: HashMap::new(),
    }
  }
}

impl<K: Eq + Hash + Clone + Debug> TaskScope<K> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start `task` under `key`, replacing whatever ran there before.
  pub async fn spawn<F>(&mut self, key: K, task: F)
  where
    F: Future<Output = ()> + Send + 'static,
  {
    self.cancel(&key).await;
    trace!(?key, "Spawning task");
    self.tasks.insert(key, tokio::spawn(task));
  }

  /// Abort the task under `key` and wait until it has stopped.
  pub async fn cancel(&mut self, key: &K) {
    if let Some(handle) = self.tasks.remove(key) {
      trace!(?key, "Cancelling task");
      handle.abort();
      // Err(JoinError::Cancelled) is the expected outcome
      let _ = handle.await;
    }
  }

  /// Abort every task whose key fails `keep`, waiting for all of them.
  pub async fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
    let doomed: Vec<K> = self.tasks.keys().filter(|k| !keep(k)).cloned().collect();
    let handles: Vec<JoinHandle<()>> = doomed
      .iter()
      .filter_map(|k| self.tasks.remove(k))
      .collect();
    for handle in &handles {
      handle.abort();
    }
    for handle in handles {
      let _ = handle.await;
    }
  }

  pub async fn cancel_all(&mut self) {
    self.retain(|_| false).await;
  }

  /// Whether a task under `key` is still running.
  pub fn is_running(&self, key: &K) -> bool {
    self
      .tasks
      .get(key)
      .map(|handle| !handle.is_finished())
      .unwrap_or(false)
  }

  pub fn len(&self) -> usize {
    self.tasks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tasks.is_empty()
  }
}

impl<K> Drop for TaskScope<K> {
  fn drop(&mut self) {
    for handle in self.tasks.values() {
      handle.abort();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;
  use std::time::Duration;

  fn counting_task(counter: Arc<AtomicU32>, delay: Duration) -> impl Future<Output = ()> {
    async move {
      tokio::time::sleep(delay).await;
      counter.fetch_add(1, Ordering::SeqCst);
    }
  }

  #[tokio::test]
  async fn test_spawn_replaces_same_key() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut scope = TaskScope::new();

    scope
      .spawn(1, counting_task(counter.clone(), Duration::from_millis(50)))
      .await;
    scope
      .spawn(1, counting_task(counter.clone(), Duration::from_millis(50)))
      .await;
    assert_eq!(scope.len(), 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    // Only the replacement ran to completion
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_keys_are_independent() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut scope = TaskScope::new();

    scope
      .spawn("a", counting_task(counter.clone(), Duration::from_millis(10)))
      .await;
    scope
      .spawn("b", counting_task(counter.clone(), Duration::from_millis(10)))
      .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(!scope.is_running(&"a"));
  }

  #[tokio::test]
  async fn test_retain_cancels_rest() {
    let counter = Arc::new(AtomicU32::new(0));
    let mut scope = TaskScope::new();
    for key in 1..=3 {
      scope
        .spawn(key, counting_task(counter.clone(), Duration::from_millis(30)))
        .await;
    }

    scope.retain(|k| *k == 2).await;
    assert_eq!(scope.len(), 1);
    assert!(scope.is_running(&2));

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_drop_aborts_tasks() {
    let counter = Arc::new(AtomicU32::new(0));
    {
      let mut scope = TaskScope::new();
      scope
        .spawn((), counting_task(counter.clone(), Duration::from_millis(20)))
        .await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }
}
