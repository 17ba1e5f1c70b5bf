use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::errors::DatabaseError;
use crate::engine::store::{CommitOutcome, NewXpLogEntry, ProgressStore, ProgressUpdate};
use crate::leveling::level_for_xp;
use crate::models::{AwardResult, XpAwardRequest, XpLogEntry};

/// Runtime switches for the award engine. Simple struct to hold env vars
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Replay prior results for repeated (user, reason, source_id) awards
    pub dedupe_enabled: bool,
    /// Upper bound on compare-and-swap attempts per award
    pub max_retries: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedupe_enabled: true,
            max_retries: 8,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            dedupe_enabled: std::env::var("AWARD_DEDUPE_ENABLED")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
            max_retries: std::env::var("AWARD_MAX_RETRIES")
                .unwrap_or_else(|_| "8".to_string())
                .parse::<u8>()
                .unwrap_or(8),
        }
    }
}

#[derive(Error, Debug)]
pub enum AwardError {
    #[error("award amount must be a positive integer, got {0}")]
    InvalidAmount(i64),

    #[error("no progress record for user {0}")]
    UserNotFound(Uuid),

    #[error("award commit did not complete: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("award for user {user_id} still conflicted after {attempts} attempts")]
    RetryLimitExceeded { user_id: Uuid, attempts: u8 },
}

impl AwardError {
    /// True for failures the caller may safely retry. Replays cannot
    /// double-apply when a source id is supplied, so retrying is safe.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence(e) => e.is_retryable(),
            Self::RetryLimitExceeded { .. } => true,
            Self::InvalidAmount(_) | Self::UserNotFound(_) => false,
        }
    }
}

/// The XP award engine.
///
/// Converts an XP delta with provenance into a consistent (xp, level)
/// transition: validates the amount, detects level-ups against the leveling
/// curve, and commits the progress update together with an audit log entry
/// through the store's atomic compare-and-swap commit. Contention is scoped
/// to the single user row; awards for different users never serialize
/// against each other.
pub struct AwardEngine<S> {
    store: S,
    config: EngineConfig,
}

impl<S: ProgressStore> AwardEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    #[tracing::instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            amount = request.amount,
            reason = %request.reason
        )
    )]
    pub async fn award_xp(&self, request: &XpAwardRequest) -> Result<AwardResult, AwardError> {
        if request.amount <= 0 {
            return Err(AwardError::InvalidAmount(request.amount));
        }

        // A replayed source id returns the originally committed result
        if let Some(source_id) = self.dedupe_key(request) {
            if let Some(prior) = self
                .store
                .find_award(request.user_id, &request.reason, source_id)
                .await?
            {
                info!(source_id = %source_id, "Duplicate award source, replaying prior result");
                return Ok(replay_result(&prior));
            }
        }

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;

            let progress = self
                .store
                .get_user_progress(request.user_id)
                .await?
                .ok_or(AwardError::UserNotFound(request.user_id))?;

            let new_xp = progress.xp + request.amount;
            let new_level = level_for_xp(new_xp);
            let leveled_up = new_level > progress.level;

            let update = ProgressUpdate {
                user_id: request.user_id,
                expected_version: progress.version,
                new_xp,
                new_level,
            };
            let entry = NewXpLogEntry {
                user_id: request.user_id,
                amount: request.amount,
                reason: request.reason.clone(),
                source_id: request.source_id.clone(),
                resulting_xp: new_xp,
                resulting_level: new_level,
            };

            match self.store.commit_award(&update, &entry).await? {
                CommitOutcome::Committed => {
                    if leveled_up {
                        info!(
                            old_level = progress.level,
                            new_level = new_level,
                            new_xp = new_xp,
                            "User leveled up"
                        );
                    }
                    return Ok(AwardResult {
                        new_xp,
                        new_level,
                        old_level: progress.level,
                        leveled_up,
                        deduplicated: false,
                    });
                }
                CommitOutcome::Conflict if attempt < self.config.max_retries => {
                    warn!(attempt = attempt, "Concurrent award for user, retrying with fresh read");

                    // Backoff keeps two racing writers from re-colliding on
                    // every attempt
                    let delay_ms = (5 * 2_u64.pow(attempt as u32 - 1)).min(200);
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                CommitOutcome::Conflict => {
                    return Err(AwardError::RetryLimitExceeded {
                        user_id: request.user_id,
                        attempts: attempt,
                    });
                }
                CommitOutcome::DuplicateSource => {
                    // Lost an idempotency race after the pre-check; the
                    // winning entry carries the result to return
                    return self.replay_from_store(request).await;
                }
            }
        }
    }

    async fn replay_from_store(&self, request: &XpAwardRequest) -> Result<AwardResult, AwardError> {
        let source_id = request.source_id.as_deref().unwrap_or_default();
        let prior = self
            .store
            .find_award(request.user_id, &request.reason, source_id)
            .await?
            .ok_or_else(|| {
                DatabaseError::NotFound(format!(
                    "award log entry for duplicate source {} of user {}",
                    source_id, request.user_id
                ))
            })?;

        info!(source_id = %source_id, "Concurrent duplicate award, replaying committed result");
        Ok(replay_result(&prior))
    }

    fn dedupe_key<'a>(&self, request: &'a XpAwardRequest) -> Option<&'a str> {
        if !self.config.dedupe_enabled {
            return None;
        }
        request.source_id.as_deref().filter(|s| !s.is_empty())
    }
}

/// Reconstruct the award result recorded by a prior log entry
fn replay_result(prior: &XpLogEntry) -> AwardResult {
    let old_level = level_for_xp(prior.resulting_xp - prior.amount);
    AwardResult {
        new_xp: prior.resulting_xp,
        new_level: prior.resulting_level,
        old_level,
        leveled_up: prior.resulting_level > old_level,
        deduplicated: true,
    }
}
