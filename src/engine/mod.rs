pub mod award;
pub mod store;

pub use award::{AwardEngine, AwardError, EngineConfig};
pub use store::{CommitOutcome, NewXpLogEntry, ProgressStore, ProgressUpdate};
