pub mod config;
pub mod entry;
pub mod exit;

pub use config::{EntryScoringConfig, ExitConfig, RsiBand};
pub use entry::{
    EntryRejection, EntryScore, EntryScorer, EntrySignal, FactorBreakdown, GoldenReason,
    TrendConfirmation,
};
pub use exit::{join_reasons, ExitEvaluation, ExitEvaluator, ExitReason};
