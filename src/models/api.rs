use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::leveling;
use crate::models::{AwardResult, UserProgress, XpLogEntry};

/// Body of POST /v2/users/{user_id}/xp/awards
#[derive(Debug, Clone, Deserialize)]
pub struct AwardXpPayload {
    pub amount: i64,
    pub reason: String,
    #[serde(default)]
    pub source_id: Option<String>,
}

/// Award endpoint response
#[derive(Debug, Clone, Serialize)]
pub struct AwardXpResponse {
    pub user_id: Uuid,
    pub new_xp: i64,
    pub new_level: i32,
    pub old_level: i32,
    pub leveled_up: bool,
    pub deduplicated: bool,
}

impl AwardXpResponse {
    pub fn from_result(user_id: Uuid, result: &AwardResult) -> Self {
        Self {
            user_id,
            new_xp: result.new_xp,
            new_level: result.new_level,
            old_level: result.old_level,
            leveled_up: result.leveled_up,
            deduplicated: result.deduplicated,
        }
    }
}

/// Progress endpoint response
#[derive(Debug, Clone, Serialize)]
pub struct ProgressResponse {
    pub user_id: Uuid,
    pub xp: i64,
    pub level: i32,
    /// Cumulative XP threshold for the next level
    pub xp_for_next_level: i64,
    pub curve_version: u32,
}

impl ProgressResponse {
    pub fn from_progress(progress: &UserProgress) -> Self {
        Self {
            user_id: progress.user_id,
            xp: progress.xp,
            level: progress.level,
            xp_for_next_level: leveling::xp_threshold_for_level(progress.level + 1),
            curve_version: leveling::CURVE_VERSION,
        }
    }
}

/// One audit entry in the XP log response
#[derive(Debug, Clone, Serialize)]
pub struct XpLogEntryResponse {
    pub amount: i64,
    pub reason: String,
    pub source_id: Option<String>,
    pub resulting_xp: i64,
    pub resulting_level: i32,
    pub created_at: DateTime<Utc>,
}

/// XP log endpoint response, newest entries first
#[derive(Debug, Clone, Serialize)]
pub struct XpLogResponse {
    pub user_id: Uuid,
    pub entries: Vec<XpLogEntryResponse>,
}

impl XpLogResponse {
    pub fn from_entries(user_id: Uuid, entries: Vec<XpLogEntry>) -> Self {
        Self {
            user_id,
            entries: entries
                .into_iter()
                .map(|entry| XpLogEntryResponse {
                    amount: entry.amount,
                    reason: entry.reason,
                    source_id: entry.source_id,
                    resulting_xp: entry.resulting_xp,
                    resulting_level: entry.resulting_level,
                    created_at: entry.created_at,
                })
                .collect(),
        }
    }
}
