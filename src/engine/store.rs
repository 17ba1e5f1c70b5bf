use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::errors::DatabaseError;
use crate::models::{UserProgress, XpLogEntry};

/// Target state of a user's progress row, guarded by the version it was
/// computed from.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub user_id: Uuid,
    pub expected_version: i64,
    pub new_xp: i64,
    pub new_level: i32,
}

/// Fields of a log entry prior to insertion; id and timestamp are assigned
/// by the store.
#[derive(Debug, Clone)]
pub struct NewXpLogEntry {
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub source_id: Option<String>,
    pub resulting_xp: i64,
    pub resulting_level: i32,
}

/// Outcome of an atomic progress-update + log-append commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Both rows committed
    Committed,
    /// The version check failed; the caller must re-read and retry
    Conflict,
    /// A log entry with the same (user_id, reason, source_id) already
    /// exists; nothing was written
    DuplicateSource,
}

/// Data-store seam for the award engine.
///
/// `commit_award` must apply the progress update and the log append as one
/// atomic unit: no reader may observe one without the other. The version
/// check scopes contention to the single user row being updated.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get_user_progress(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserProgress>, DatabaseError>;

    /// Look up a prior award with the same (user_id, reason, source_id)
    async fn find_award(
        &self,
        user_id: Uuid,
        reason: &str,
        source_id: &str,
    ) -> Result<Option<XpLogEntry>, DatabaseError>;

    async fn commit_award(
        &self,
        update: &ProgressUpdate,
        entry: &NewXpLogEntry,
    ) -> Result<CommitOutcome, DatabaseError>;
}

#[async_trait]
impl<S: ProgressStore + ?Sized> ProgressStore for Arc<S> {
    async fn get_user_progress(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserProgress>, DatabaseError> {
        (**self).get_user_progress(user_id).await
    }

    async fn find_award(
        &self,
        user_id: Uuid,
        reason: &str,
        source_id: &str,
    ) -> Result<Option<XpLogEntry>, DatabaseError> {
        (**self).find_award(user_id, reason, source_id).await
    }

    async fn commit_award(
        &self,
        update: &ProgressUpdate,
        entry: &NewXpLogEntry,
    ) -> Result<CommitOutcome, DatabaseError> {
        (**self).commit_award(update, entry).await
    }
}
