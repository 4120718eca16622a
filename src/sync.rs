/// Mutate-then-reconcile pipeline.
///
/// All writes to the backend go through `SyncEngine::apply`: the mutation is
/// sent, and only if it succeeds exactly one full re-fetch follows. The store
/// is updated from that fetch alone, never from the mutation itself, so a
/// failed call can not leave half-applied state behind.
///
/// Concurrent refreshes are not serialized. By default whichever response is
/// processed last wins; `OrderingPolicy::DropStale` discards responses to
/// requests that were issued before the snapshot already applied.
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::gateway::TaskGateway;
use crate::store::TaskStore;
use crate::task::{Draft, NewTask, TaskUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderingPolicy {
    #[default]
    LastResponseWins,
    DropStale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fetched list replaced the store contents.
    Applied { count: usize },
    /// A newer snapshot was already applied; this response was discarded.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create(NewTask),
    Delete(String),
    Complete(String),
    Update { id: String, update: TaskUpdate },
}

impl Mutation {
    fn label(&self) -> &'static str {
        match self {
            Mutation::Create(_) => "create",
            Mutation::Delete(_) => "delete",
            Mutation::Complete(_) => "complete",
            Mutation::Update { .. } => "update",
        }
    }
}

/// A mutation that reached the server, plus how the follow-up fetch went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationReport {
    pub reconcile: SyncResult<RefreshOutcome>,
}

pub struct SyncEngine<G> {
    gateway: G,
    store: TaskStore,
    ordering: OrderingPolicy,
    /// Sequence token handed to the most recently issued fetch
    issued: AtomicU64,
    /// Sequence token of the snapshot currently in the store
    applied: Mutex<u64>,
}

impl<G: TaskGateway> SyncEngine<G> {
    pub fn new(gateway: G, store: TaskStore, ordering: OrderingPolicy) -> Self {
        Self {
            gateway,
            store,
            ordering,
            issued: AtomicU64::new(0),
            applied: Mutex::new(0),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    #[cfg(test)]
    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Fetch the full list and mirror it into the store.
    ///
    /// On failure the store keeps its previous contents.
    pub async fn refresh(&self) -> SyncResult<RefreshOutcome> {
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let tasks = match self.gateway.fetch_tasks().await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(seq, error = %e, "refresh failed; keeping previous task list");
                return Err(e);
            }
        };

        let count = tasks.len();
        // Check-and-apply under one lock so two late responses can't interleave
        let mut applied = self.applied.lock().unwrap_or_else(|p| p.into_inner());
        if self.ordering == OrderingPolicy::DropStale && seq < *applied {
            debug!(seq, applied = *applied, "dropping stale task list");
            return Ok(RefreshOutcome::Stale);
        }
        *applied = (*applied).max(seq);
        self.store.replace_all(tasks);
        debug!(seq, count, "task list applied");
        Ok(RefreshOutcome::Applied { count })
    }

    /// Send one mutation; on success reconcile with exactly one refresh.
    pub async fn apply(&self, mutation: Mutation) -> SyncResult<MutationReport> {
        let label = mutation.label();
        let result = match &mutation {
            Mutation::Create(task) => self.gateway.create_task(task).await,
            Mutation::Delete(id) => self.gateway.delete_task(id).await,
            Mutation::Complete(id) => self.gateway.set_done(id).await,
            Mutation::Update { id, update } => self.gateway.update_task(id, update).await,
        };
        if let Err(e) = result {
            warn!(mutation = label, error = %e, "mutation failed; store untouched");
            return Err(e);
        }
        debug!(mutation = label, "mutation accepted; reconciling");
        Ok(MutationReport { reconcile: self.refresh().await })
    }

    /// Validate the draft and create it. An invalid draft makes no request.
    pub async fn create(&self, draft: &Draft) -> SyncResult<MutationReport> {
        let task = draft.to_new_task()?;
        self.apply(Mutation::Create(task)).await
    }

    pub async fn delete(&self, id: &str) -> SyncResult<MutationReport> {
        self.apply(Mutation::Delete(id.to_string())).await
    }

    pub async fn complete(&self, id: &str) -> SyncResult<MutationReport> {
        self.apply(Mutation::Complete(id.to_string())).await
    }
}

// ── Test doubles shared with other modules' tests ────────────────────────────
