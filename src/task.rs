/// Task data model plus the client-side draft and suggestion types.
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

// ── Task (server-owned) ───────────────────────────────────────────────────────

/// A persisted to-do item, exactly as the backend reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Server-assigned identifier. MongoDB-backed servers emit `_id`.
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub done: bool,
}

// ── Request bodies ────────────────────────────────────────────────────────────

/// POST body for `/tasks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
}

/// PUT body that only flips the completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DonePatch {
    pub done: bool,
}

impl DonePatch {
    pub const DONE: DonePatch = DonePatch { done: true };
}

/// PUT body for a full edit of an existing task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskUpdate {
    pub title: String,
    pub description: String,
    pub done: bool,
}

impl From<&Task> for TaskUpdate {
    fn from(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            done: task.done,
        }
    }
}

// ── Draft (view-owned, unsent) ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub title: String,
    pub description: String,
}

impl Draft {
    pub fn is_empty(&self) -> bool {
        self.title.is_empty() && self.description.is_empty()
    }

    /// Build the POST body. A draft without a title never leaves the client.
    pub fn to_new_task(&self) -> SyncResult<NewTask> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(SyncError::Validation("A task needs a title.".to_string()));
        }
        Ok(NewTask {
            title: title.to_string(),
            description: self.description.trim().to_string(),
        })
    }

    /// Overwrite the whole draft with a parsed suggestion.
    pub fn fill_from(&mut self, suggestion: &Suggestion) {
        self.title = suggestion.title.clone();
        self.description = suggestion.description.clone().unwrap_or_default();
    }

    pub fn reset(&mut self) {
        self.title.clear();
        self.description.clear();
    }
}

// ── Suggestion ────────────────────────────────────────────────────────────────

/// An AI suggestion split into its `"<title>:<description>"` halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub title: String,
    /// `None` when the text carried no colon at all.
    pub description: Option<String>,
}

impl Suggestion {
    /// Split on the first colon only; later colons belong to the description.
    pub fn parse(text: &str) -> Self {
        match text.split_once(':') {
            Some((title, description)) => Self {
                title: title.trim().to_string(),
                description: Some(description.trim().to_string()),
            },
            None => Self {
                title: text.trim().to_string(),
                description: None,
            },
        }
    }
}
