use anyhow::Result;
use async_trait::async_trait;

use crate::{Bar, Quote, TechnicalSnapshot};

/// Market data consumed by the engine. Implementations own fetching, retries
/// and caching; the engine only awaits the results.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// `Ok(None)` when no indicator computation is available for the ticker.
    async fn get_technical_snapshot(&self, ticker: &str) -> Result<Option<TechnicalSnapshot>>;

    /// Most recent `lookback` bars, oldest first.
    async fn get_recent_bars(&self, ticker: &str, lookback: usize) -> Result<Vec<Bar>>;

    async fn get_quote(&self, ticker: &str) -> Result<Quote>;
}

/// Persistence for open positions, keyed by ticker.
#[async_trait]
pub trait PositionStore<P>: Send + Sync
where
    P: Send + Sync + 'static,
{
    async fn load(&self, ticker: &str) -> Result<Option<P>>;
    async fn save(&self, ticker: &str, position: &P) -> Result<()>;
    async fn delete(&self, ticker: &str) -> Result<()>;
}
