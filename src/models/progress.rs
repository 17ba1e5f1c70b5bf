use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Subset of the user_progress table the award engine operates on
///
/// `level` is derived from `xp` but persisted redundantly for fast reads;
/// after any successful award it equals `level_for_xp(xp)`. `version` backs
/// the compare-and-swap discipline that serializes awards per user.
#[derive(Debug, Clone, FromRow)]
pub struct UserProgress {
    pub user_id: Uuid,
    pub xp: i64,
    pub level: i32,
    pub version: i64,
}

/// A single request to add XP to a user, with provenance
#[derive(Debug, Clone)]
pub struct XpAwardRequest {
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub source_id: Option<String>,
}

/// Outcome of a successful award
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AwardResult {
    pub new_xp: i64,
    pub new_level: i32,
    pub old_level: i32,
    pub leveled_up: bool,
    /// True when an idempotent replay returned a previously committed result
    pub deduplicated: bool,
}

/// Append-only audit record, one per successful award
#[derive(Debug, Clone, FromRow)]
pub struct XpLogEntry {
    pub id: i64,
    pub user_id: Uuid,
    pub amount: i64,
    pub reason: String,
    pub source_id: Option<String>,
    pub resulting_xp: i64,
    pub resulting_level: i32,
    pub created_at: DateTime<Utc>,
}
