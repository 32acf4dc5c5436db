//! Trading decision engine: entry scoring, exit evaluation, enhanced
//! validation and risk sizing behind [`TradingEngine`], with the per-ticker
//! position lifecycle and the admission-side bookkeeping around it.

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod portfolio_guard;
pub mod position_manager;
pub mod state_manager;
pub mod telemetry;
pub mod types;

pub use config::EngineConfig;
pub use engine::{EntryRequest, TradingEngine};
pub use error::{EngineError, Result};
pub use metrics::DecisionMetrics;
pub use portfolio_guard::DailyTradeLimiter;
pub use position_manager::{OpenPosition, PositionStatus, PositionUpdate};
pub use state_manager::{InMemoryPositionStore, PositionHandle, PositionRegistry, SharedConfig};
pub use telemetry::init_tracing;
pub use types::{EntryBlock, EntryDecision, EntryOutcome, ExitCycleOutcome};
