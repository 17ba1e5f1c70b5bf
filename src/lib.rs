pub mod api;
pub mod auth;
pub mod db;
pub mod engine;
pub mod leveling;
pub mod models;

// Re-export commonly used types
pub use db::{create_pool, health_check, DatabaseError, PgProgressStore};
pub use engine::{
    AwardEngine, AwardError, CommitOutcome, EngineConfig, NewXpLogEntry, ProgressStore,
    ProgressUpdate,
};
pub use leveling::{level_for_xp, xp_threshold_for_level, CURVE_VERSION};
pub use models::{AwardResult, UserProgress, XpAwardRequest, XpLogEntry};
