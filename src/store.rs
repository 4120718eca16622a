/// Task store: the single shared, mutable view of the task list.
///
/// The collection is a mirror of the last successful fetch. It is written in
/// exactly one way, `replace_all`, which swaps the whole snapshot at once and
/// wakes every subscriber. There is no per-task mutator and no merge.
///
/// Handles are cheap to clone; all clones observe the same snapshot.
use std::sync::Arc;

use tokio::sync::watch;

use crate::task::Task;

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Number of snapshots applied so far (0 = nothing fetched yet)
    pub version: u64,
    pub tasks: Arc<Vec<Task>>,
}

#[derive(Clone)]
pub struct TaskStore {
    tx: Arc<watch::Sender<Snapshot>>,
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Snapshot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current tasks, in the order the server sent them.
    pub fn get_all(&self) -> Vec<Task> {
        self.tx.borrow().tasks.as_ref().clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.tx.borrow().clone()
    }

    /// Atomically swap the full collection and notify subscribers.
    ///
    /// Never fails: with no subscriber left (view torn down) the snapshot is
    /// still stored and the call is otherwise a no-op.
    pub fn replace_all(&self, tasks: Vec<Task>) {
        self.tx.send_modify(|snap| {
            snap.version += 1;
            snap.tasks = Arc::new(tasks);
        });
    }

    /// Receiver that wakes on every `replace_all`.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, title: &str) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            done: false,
        }
    }

    #[test]
    fn test_new_store_is_empty() {
        let store = TaskStore::new();
        assert!(store.get_all().is_empty());
        assert_eq!(store.snapshot().version, 0);
    }

    #[test]
    fn test_replace_all_swaps_whole_collection() {
        let store = TaskStore::new();
        store.replace_all(vec![task("1", "A"), task("2", "B")]);
        store.replace_all(vec![task("3", "C")]);

        let all = store.get_all();
        assert_eq!(all, vec![task("3", "C")]);
        assert_eq!(store.snapshot().version, 2);
    }

    #[test]
    fn test_replace_all_with_empty_collection() {
        let store = TaskStore::new();
        store.replace_all(vec![task("1", "A")]);
        store.replace_all(Vec::new());
        assert!(store.get_all().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let store = TaskStore::new();
        let other = store.clone();
        other.replace_all(vec![task("1", "A")]);
        assert_eq!(store.get_all().len(), 1);
    }

    #[test]
    fn test_replace_all_without_subscribers_is_harmless() {
        let store = TaskStore::new();
        let rx = store.subscribe();
        drop(rx);
        store.replace_all(vec![task("1", "A")]);
        assert_eq!(store.get_all().len(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_is_notified() {
        let store = TaskStore::new();
        let mut rx = store.subscribe();
        store.replace_all(vec![task("1", "A")]);
        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.version, 1);
        assert_eq!(snap.tasks[0].id, "1");
    }
}
