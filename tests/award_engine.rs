use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use habit_scorer::db::DatabaseError;
use habit_scorer::engine::{
    AwardEngine, AwardError, CommitOutcome, EngineConfig, NewXpLogEntry, ProgressStore,
    ProgressUpdate,
};
use habit_scorer::leveling::level_for_xp;
use habit_scorer::models::{UserProgress, XpAwardRequest, XpLogEntry};

/// In-memory ProgressStore with the same commit semantics as the Postgres
/// store: version-checked updates, a unique (user, reason, source)
/// constraint, and atomic progress+log commits.
struct MemoryStore {
    inner: Mutex<MemoryState>,
    /// Yield to the scheduler between read and commit to widen the race
    /// window between concurrent awards
    interleave: bool,
    enforce_unique_source: bool,
}

#[derive(Default)]
struct MemoryState {
    progress: HashMap<Uuid, UserProgress>,
    log: Vec<XpLogEntry>,
    next_log_id: i64,
}

impl MemoryStore {
    fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryState::default()),
            interleave: false,
            enforce_unique_source: true,
        }
    }

    fn with_interleave() -> Self {
        Self {
            interleave: true,
            ..Self::new()
        }
    }

    fn without_unique_source() -> Self {
        Self {
            enforce_unique_source: false,
            ..Self::new()
        }
    }

    async fn seed_user(&self, user_id: Uuid, xp: i64) {
        let mut state = self.inner.lock().await;
        state.progress.insert(
            user_id,
            UserProgress {
                user_id,
                xp,
                level: level_for_xp(xp),
                version: 0,
            },
        );
    }

    async fn progress_of(&self, user_id: Uuid) -> UserProgress {
        self.inner
            .lock()
            .await
            .progress
            .get(&user_id)
            .cloned()
            .expect("user not seeded")
    }

    async fn entries_for(&self, user_id: Uuid) -> Vec<XpLogEntry> {
        self.inner
            .lock()
            .await
            .log
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn get_user_progress(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserProgress>, DatabaseError> {
        let progress = self.inner.lock().await.progress.get(&user_id).cloned();
        if self.interleave {
            tokio::task::yield_now().await;
        }
        Ok(progress)
    }

    async fn find_award(
        &self,
        user_id: Uuid,
        reason: &str,
        source_id: &str,
    ) -> Result<Option<XpLogEntry>, DatabaseError> {
        let state = self.inner.lock().await;
        Ok(state
            .log
            .iter()
            .find(|e| {
                e.user_id == user_id
                    && e.reason == reason
                    && e.source_id.as_deref() == Some(source_id)
            })
            .cloned())
    }

    async fn commit_award(
        &self,
        update: &ProgressUpdate,
        entry: &NewXpLogEntry,
    ) -> Result<CommitOutcome, DatabaseError> {
        let mut state = self.inner.lock().await;

        let version_matches = match state.progress.get(&update.user_id) {
            None => {
                return Err(DatabaseError::NotFound(format!(
                    "user {}",
                    update.user_id
                )))
            }
            Some(p) => p.version == update.expected_version,
        };
        if !version_matches {
            return Ok(CommitOutcome::Conflict);
        }

        if self.enforce_unique_source {
            if let Some(source_id) = entry.source_id.as_deref() {
                let duplicate = state.log.iter().any(|e| {
                    e.user_id == entry.user_id
                        && e.reason == entry.reason
                        && e.source_id.as_deref() == Some(source_id)
                });
                if duplicate {
                    return Ok(CommitOutcome::DuplicateSource);
                }
            }
        }

        let progress = state
            .progress
            .get_mut(&update.user_id)
            .expect("checked above");
        progress.xp = update.new_xp;
        progress.level = update.new_level;
        progress.version += 1;

        state.next_log_id += 1;
        let id = state.next_log_id;
        state.log.push(XpLogEntry {
            id,
            user_id: entry.user_id,
            amount: entry.amount,
            reason: entry.reason.clone(),
            source_id: entry.source_id.clone(),
            resulting_xp: entry.resulting_xp,
            resulting_level: entry.resulting_level,
            created_at: Utc::now(),
        });

        Ok(CommitOutcome::Committed)
    }
}

/// Store that reports a version conflict on every commit
struct ConflictStore {
    user_id: Uuid,
}

#[async_trait]
impl ProgressStore for ConflictStore {
    async fn get_user_progress(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserProgress>, DatabaseError> {
        Ok((user_id == self.user_id).then(|| UserProgress {
            user_id,
            xp: 0,
            level: 1,
            version: 0,
        }))
    }

    async fn find_award(
        &self,
        _user_id: Uuid,
        _reason: &str,
        _source_id: &str,
    ) -> Result<Option<XpLogEntry>, DatabaseError> {
        Ok(None)
    }

    async fn commit_award(
        &self,
        _update: &ProgressUpdate,
        _entry: &NewXpLogEntry,
    ) -> Result<CommitOutcome, DatabaseError> {
        Ok(CommitOutcome::Conflict)
    }
}

/// Store whose commits fail with a transient connection error
struct FailingStore {
    user_id: Uuid,
}

#[async_trait]
impl ProgressStore for FailingStore {
    async fn get_user_progress(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserProgress>, DatabaseError> {
        Ok((user_id == self.user_id).then(|| UserProgress {
            user_id,
            xp: 0,
            level: 1,
            version: 0,
        }))
    }

    async fn find_award(
        &self,
        _user_id: Uuid,
        _reason: &str,
        _source_id: &str,
    ) -> Result<Option<XpLogEntry>, DatabaseError> {
        Ok(None)
    }

    async fn commit_award(
        &self,
        _update: &ProgressUpdate,
        _entry: &NewXpLogEntry,
    ) -> Result<CommitOutcome, DatabaseError> {
        Err(DatabaseError::ConnectionError(
            "connection reset by peer".to_string(),
        ))
    }
}

fn award(user_id: Uuid, amount: i64, reason: &str, source_id: Option<&str>) -> XpAwardRequest {
    XpAwardRequest {
        user_id,
        amount,
        reason: reason.to_string(),
        source_id: source_id.map(|s| s.to_string()),
    }
}

fn engine_over(store: Arc<MemoryStore>) -> AwardEngine<Arc<MemoryStore>> {
    AwardEngine::new(store, EngineConfig::default())
}

#[tokio::test]
async fn test_award_applies_and_logs() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 0).await;
    let engine = engine_over(Arc::clone(&store));

    let result = engine
        .award_xp(&award(user_id, 10, "habit_completed", None))
        .await
        .unwrap();

    assert_eq!(result.new_xp, 10);
    assert_eq!(result.new_level, 1);
    assert_eq!(result.old_level, 1);
    assert!(!result.leveled_up);
    assert!(!result.deduplicated);

    let progress = store.progress_of(user_id).await;
    assert_eq!(progress.xp, 10);
    assert_eq!(progress.level, 1);
    assert_eq!(progress.version, 1);

    let entries = store.entries_for(user_id).await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, 10);
    assert_eq!(entries[0].reason, "habit_completed");
    assert_eq!(entries[0].resulting_xp, progress.xp);
    assert_eq!(entries[0].resulting_level, progress.level);
}

#[tokio::test]
async fn test_sequential_awards_compose() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 0).await;
    let engine = engine_over(Arc::clone(&store));

    engine
        .award_xp(&award(user_id, 10, "habit_completed", None))
        .await
        .unwrap();
    let result = engine
        .award_xp(&award(user_id, 15, "goal_completed", None))
        .await
        .unwrap();

    assert_eq!(result.new_xp, 25);
    assert_eq!(result.new_level, level_for_xp(25));

    let progress = store.progress_of(user_id).await;
    assert_eq!(progress.xp, 25);
    assert_eq!(store.entries_for(user_id).await.len(), 2);
}

#[tokio::test]
async fn test_level_up_detection() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 0).await;
    let engine = engine_over(Arc::clone(&store));

    let result = engine
        .award_xp(&award(user_id, 100, "milestone_completed", None))
        .await
        .unwrap();

    assert!(result.leveled_up);
    assert_eq!(result.old_level, 1);
    assert_eq!(result.new_level, 2);
    assert_eq!(result.new_xp, 100);
}

#[tokio::test]
async fn test_multi_level_jump() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 0).await;
    let engine = engine_over(Arc::clone(&store));

    // Thresholds run 100, 300, 600; a single +600 jumps straight to level 4
    let result = engine
        .award_xp(&award(user_id, 600, "milestone_completed", None))
        .await
        .unwrap();

    assert!(result.leveled_up);
    assert_eq!(result.old_level, 1);
    assert_eq!(result.new_level, 4);
}

#[tokio::test]
async fn test_award_from_nonzero_seed() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 250).await;
    let engine = engine_over(Arc::clone(&store));

    let result = engine
        .award_xp(&award(user_id, 50, "habit_completed", None))
        .await
        .unwrap();

    assert_eq!(result.new_xp, 300);
    assert_eq!(result.old_level, 2);
    assert_eq!(result.new_level, 3);
    assert!(result.leveled_up);
}

#[tokio::test]
async fn test_rejects_non_positive_amounts() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 40).await;
    let engine = engine_over(Arc::clone(&store));

    for amount in [0, -5] {
        let err = engine
            .award_xp(&award(user_id, amount, "habit_completed", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AwardError::InvalidAmount(a) if a == amount));
        assert!(!err.is_retryable());
    }

    // Stored state is untouched
    let progress = store.progress_of(user_id).await;
    assert_eq!(progress.xp, 40);
    assert_eq!(progress.version, 0);
    assert!(store.entries_for(user_id).await.is_empty());
}

#[tokio::test]
async fn test_unknown_user_fails_with_no_writes() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_over(Arc::clone(&store));
    let user_id = Uuid::new_v4();

    let err = engine
        .award_xp(&award(user_id, 10, "habit_completed", None))
        .await
        .unwrap_err();

    assert!(matches!(err, AwardError::UserNotFound(id) if id == user_id));
    assert!(!err.is_retryable());
    assert!(store.entries_for(user_id).await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_awards_never_lose_updates() {
    for trial in 0..100 {
        let store = Arc::new(MemoryStore::with_interleave());
        let user_id = Uuid::new_v4();
        store.seed_user(user_id, 0).await;
        let engine = Arc::new(engine_over(Arc::clone(&store)));

        let first = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .award_xp(&award(user_id, 10, "habit_completed", None))
                    .await
            }
        });
        let second = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .award_xp(&award(user_id, 10, "habit_completed", None))
                    .await
            }
        });

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let progress = store.progress_of(user_id).await;
        assert_eq!(progress.xp, 20, "lost update in trial {}", trial);
        assert_eq!(progress.level, level_for_xp(20));
        assert_eq!(
            store.entries_for(user_id).await.len(),
            2,
            "missing log entry in trial {}",
            trial
        );
    }
}

#[tokio::test]
async fn test_log_matches_progress_at_every_commit() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 0).await;
    let engine = engine_over(Arc::clone(&store));

    let mut expected_xp = 0;
    for amount in [10, 25, 70, 5] {
        engine
            .award_xp(&award(user_id, amount, "habit_completed", None))
            .await
            .unwrap();
        expected_xp += amount;
    }

    let progress = store.progress_of(user_id).await;
    let entries = store.entries_for(user_id).await;

    assert_eq!(progress.xp, expected_xp);
    assert_eq!(entries.len(), 4);

    // Each entry snapshots a consistent running total
    let mut running = 0;
    for entry in &entries {
        running += entry.amount;
        assert_eq!(entry.resulting_xp, running);
        assert_eq!(entry.resulting_level, level_for_xp(running));
    }

    let last = entries.last().unwrap();
    assert_eq!(last.resulting_xp, progress.xp);
    assert_eq!(last.resulting_level, progress.level);
}

#[tokio::test]
async fn test_idempotent_replay_returns_original_result() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 0).await;
    let engine = engine_over(Arc::clone(&store));

    let request = award(user_id, 100, "habit_completed", Some("habit-42"));
    let first = engine.award_xp(&request).await.unwrap();
    let replayed = engine.award_xp(&request).await.unwrap();

    assert!(!first.deduplicated);
    assert!(replayed.deduplicated);
    assert_eq!(replayed.new_xp, first.new_xp);
    assert_eq!(replayed.new_level, first.new_level);
    assert_eq!(replayed.old_level, first.old_level);
    assert_eq!(replayed.leveled_up, first.leveled_up);

    // No double-award
    let progress = store.progress_of(user_id).await;
    assert_eq!(progress.xp, 100);
    assert_eq!(store.entries_for(user_id).await.len(), 1);
}

#[tokio::test]
async fn test_same_source_different_reason_is_not_a_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 0).await;
    let engine = engine_over(Arc::clone(&store));

    engine
        .award_xp(&award(user_id, 10, "habit_completed", Some("record-1")))
        .await
        .unwrap();
    let result = engine
        .award_xp(&award(user_id, 10, "goal_completed", Some("record-1")))
        .await
        .unwrap();

    assert!(!result.deduplicated);
    assert_eq!(store.progress_of(user_id).await.xp, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_source_converges() {
    for trial in 0..25 {
        let store = Arc::new(MemoryStore::with_interleave());
        let user_id = Uuid::new_v4();
        store.seed_user(user_id, 0).await;
        let engine = Arc::new(engine_over(Arc::clone(&store)));

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                tokio::spawn({
                    let engine = Arc::clone(&engine);
                    async move {
                        engine
                            .award_xp(&award(user_id, 10, "habit_completed", Some("habit-7")))
                            .await
                    }
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }

        // Exactly one commit; the racer replays the committed result
        let progress = store.progress_of(user_id).await;
        assert_eq!(progress.xp, 10, "double award in trial {}", trial);
        assert_eq!(store.entries_for(user_id).await.len(), 1);
        assert_eq!(
            results.iter().filter(|r| !r.deduplicated).count(),
            1,
            "expected one committed result in trial {}",
            trial
        );
        for result in &results {
            assert_eq!(result.new_xp, 10);
        }
    }
}

#[tokio::test]
async fn test_dedupe_disabled_awards_unconditionally() {
    let store = Arc::new(MemoryStore::without_unique_source());
    let user_id = Uuid::new_v4();
    store.seed_user(user_id, 0).await;
    let engine = AwardEngine::new(
        Arc::clone(&store),
        EngineConfig {
            dedupe_enabled: false,
            ..EngineConfig::default()
        },
    );

    let request = award(user_id, 10, "habit_completed", Some("habit-42"));
    engine.award_xp(&request).await.unwrap();
    let second = engine.award_xp(&request).await.unwrap();

    assert!(!second.deduplicated);
    assert_eq!(store.progress_of(user_id).await.xp, 20);
    assert_eq!(store.entries_for(user_id).await.len(), 2);
}

#[tokio::test]
async fn test_retry_exhaustion_is_retryable_failure() {
    let user_id = Uuid::new_v4();
    let engine = AwardEngine::new(
        ConflictStore { user_id },
        EngineConfig {
            dedupe_enabled: true,
            max_retries: 3,
        },
    );

    let err = engine
        .award_xp(&award(user_id, 10, "habit_completed", None))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AwardError::RetryLimitExceeded { attempts: 3, .. }
    ));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_commit_failure_surfaces_as_persistence() {
    let user_id = Uuid::new_v4();
    let engine = AwardEngine::new(FailingStore { user_id }, EngineConfig::default());

    let err = engine
        .award_xp(&award(user_id, 10, "habit_completed", None))
        .await
        .unwrap_err();

    assert!(matches!(err, AwardError::Persistence(_)));
    assert!(err.is_retryable());
}
