/// Error types for task synchronization and suggestion ingestion.
///
/// Every variant is caught where it happens, logged, and turned into a single
/// notice in the view. Nothing here is allowed to take the view down.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("failed to fetch tasks: {reason}")]
    Fetch { reason: String },

    #[error("failed to create task: {reason}")]
    Create { reason: String },

    #[error("failed to delete task '{id}': {reason}")]
    Delete { id: String, reason: String },

    #[error("failed to update task '{id}': {reason}")]
    Update { id: String, reason: String },

    #[error("AI recommendations failed: {0}")]
    Recommendation(RecommendationFailure),

    #[error("{0}")]
    Validation(String),
}

/// Why a request to the generative-AI endpoint produced no suggestions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecommendationFailure {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("rate limited by the AI endpoint")]
    RateLimited,

    #[error("AI endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response shape: {0}")]
    Malformed(String),
}

impl SyncError {
    /// Short label for the status bar.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Fetch { .. } => "fetch",
            SyncError::Create { .. } => "create",
            SyncError::Delete { .. } => "delete",
            SyncError::Update { .. } => "update",
            SyncError::Recommendation(_) => "ai",
            SyncError::Validation(_) => "input",
        }
    }
}

impl From<RecommendationFailure> for SyncError {
    fn from(failure: RecommendationFailure) -> Self {
        SyncError::Recommendation(failure)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
