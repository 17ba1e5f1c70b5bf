use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::errors::{is_unique_violation, DatabaseError, Result};
use crate::engine::store::{CommitOutcome, NewXpLogEntry, ProgressStore, ProgressUpdate};
use crate::models::{UserProgress, XpLogEntry};

/// Load a user's progress row, if any
#[tracing::instrument(skip(pool), fields(user_id = %user_id))]
pub async fn load_user_progress(pool: &PgPool, user_id: Uuid) -> Result<Option<UserProgress>> {
    debug!("Loading progress for user: {}", user_id);

    let record = sqlx::query_as::<_, UserProgress>(
        r#"
        SELECT user_id, xp, level, version
        FROM user_progress
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(record)
}

/// Look up a prior award by its idempotency tuple
#[tracing::instrument(skip(pool), fields(user_id = %user_id, reason = %reason))]
pub async fn find_award_by_source(
    pool: &PgPool,
    user_id: Uuid,
    reason: &str,
    source_id: &str,
) -> Result<Option<XpLogEntry>> {
    let entry = sqlx::query_as::<_, XpLogEntry>(
        r#"
        SELECT id, user_id, amount, reason, source_id,
               resulting_xp, resulting_level, created_at
        FROM xp_log
        WHERE user_id = $1
            AND reason = $2
            AND source_id = $3
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(reason)
    .bind(source_id)
    .fetch_optional(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    Ok(entry)
}

/// Load recent audit entries for a user, newest first
#[tracing::instrument(skip(pool), fields(user_id = %user_id, limit = limit))]
pub async fn load_recent_log(pool: &PgPool, user_id: Uuid, limit: i64) -> Result<Vec<XpLogEntry>> {
    let entries = sqlx::query_as::<_, XpLogEntry>(
        r#"
        SELECT id, user_id, amount, reason, source_id,
               resulting_xp, resulting_level, created_at
        FROM xp_log
        WHERE user_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(DatabaseError::QueryError)?;

    info!("Loaded {} log entries for user {}", entries.len(), user_id);
    Ok(entries)
}

/// Postgres-backed progress store.
///
/// `commit_award` runs the version-checked progress update and the log
/// append in one transaction, so readers never observe one without the
/// other. The partial unique index on (user_id, reason, source_id) converts
/// concurrent duplicate awards into a DuplicateSource outcome.
#[derive(Clone)]
pub struct PgProgressStore {
    pool: PgPool,
}

impl PgProgressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressStore for PgProgressStore {
    async fn get_user_progress(&self, user_id: Uuid) -> Result<Option<UserProgress>> {
        load_user_progress(&self.pool, user_id).await
    }

    async fn find_award(
        &self,
        user_id: Uuid,
        reason: &str,
        source_id: &str,
    ) -> Result<Option<XpLogEntry>> {
        find_award_by_source(&self.pool, user_id, reason, source_id).await
    }

    #[tracing::instrument(
        skip(self, update, entry),
        fields(
            user_id = %update.user_id,
            expected_version = update.expected_version,
            new_xp = update.new_xp
        )
    )]
    async fn commit_award(
        &self,
        update: &ProgressUpdate,
        entry: &NewXpLogEntry,
    ) -> Result<CommitOutcome> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            DatabaseError::TransactionError(format!("Failed to start award transaction: {}", e))
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE user_progress
            SET xp = $3, level = $4, version = version + 1, updated_at = NOW()
            WHERE user_id = $1 AND version = $2
            "#,
        )
        .bind(update.user_id)
        .bind(update.expected_version)
        .bind(update.new_xp)
        .bind(update.new_level)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::QueryError)?;

        if updated.rows_affected() == 0 {
            // Another award won the version race; the engine re-reads
            tx.rollback().await.map_err(|e| {
                DatabaseError::TransactionError(format!("Failed to roll back: {}", e))
            })?;
            debug!("Version conflict for user {}", update.user_id);
            return Ok(CommitOutcome::Conflict);
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO xp_log
                (user_id, amount, reason, source_id, resulting_xp, resulting_level, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.amount)
        .bind(&entry.reason)
        .bind(&entry.source_id)
        .bind(entry.resulting_xp)
        .bind(entry.resulting_level)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await.map_err(|e| {
                    DatabaseError::TransactionError(format!("Failed to commit award: {}", e))
                })?;
                info!(
                    "Committed award of {} XP for user {}",
                    entry.amount, entry.user_id
                );
                Ok(CommitOutcome::Committed)
            }
            Err(e) if is_unique_violation(&e) => {
                // The dedupe index caught a concurrent duplicate; the
                // progress update rolls back with the transaction
                tx.rollback().await.map_err(|e| {
                    DatabaseError::TransactionError(format!("Failed to roll back: {}", e))
                })?;
                Ok(CommitOutcome::DuplicateSource)
            }
            Err(e) => Err(DatabaseError::QueryError(e)),
        }
    }
}
