use std::sync::{Arc, RwLock};

use analysis_core::{ConfigError, PositionStore};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use validation::{EnhancedValidationPipeline, PeakDetectionConfig};

use crate::error::EngineError;
use crate::position_manager::OpenPosition;

pub type PositionHandle = Arc<Mutex<OpenPosition>>;

/// Live positions keyed by ticker. Each position sits behind its own async
/// lock, so cycles on one ticker run one at a time while different tickers
/// proceed in parallel.
#[derive(Debug, Default)]
pub struct PositionRegistry {
    positions: DashMap<String, PositionHandle>,
}

impl PositionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new position. Fails if the ticker already has one.
    pub fn insert(&self, position: OpenPosition) -> Result<PositionHandle, EngineError> {
        use dashmap::mapref::entry::Entry;

        match self.positions.entry(position.ticker.clone()) {
            Entry::Occupied(_) => Err(EngineError::PositionAlreadyOpen(position.ticker)),
            Entry::Vacant(slot) => {
                let handle = Arc::new(Mutex::new(position));
                slot.insert(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Return the tracked handle, or start tracking `position` if none exists.
    pub fn get_or_insert(&self, position: OpenPosition) -> PositionHandle {
        self.positions
            .entry(position.ticker.clone())
            .or_insert_with(|| Arc::new(Mutex::new(position)))
            .clone()
    }

    pub fn get(&self, ticker: &str) -> Option<PositionHandle> {
        self.positions.get(ticker).map(|h| h.clone())
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.positions.contains_key(ticker)
    }

    pub fn remove(&self, ticker: &str) -> Option<PositionHandle> {
        self.positions.remove(ticker).map(|(_, h)| h)
    }

    /// Whether `ticker` is tracked by exactly this handle.
    pub fn holds(&self, ticker: &str, handle: &PositionHandle) -> bool {
        self.positions
            .get(ticker)
            .is_some_and(|current| Arc::ptr_eq(current.value(), handle))
    }

    /// Remove `ticker` only while it still maps to `handle`, leaving any
    /// newer position for the same ticker alone.
    pub fn remove_handle(&self, ticker: &str, handle: &PositionHandle) -> bool {
        self.positions
            .remove_if(ticker, |_, current| Arc::ptr_eq(current, handle))
            .is_some()
    }

    pub fn tickers(&self) -> Vec<String> {
        self.positions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Process-local `PositionStore`, for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryPositionStore {
    records: DashMap<String, OpenPosition>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PositionStore<OpenPosition> for InMemoryPositionStore {
    async fn load(&self, ticker: &str) -> Result<Option<OpenPosition>> {
        Ok(self.records.get(ticker).map(|p| p.clone()))
    }

    async fn save(&self, ticker: &str, position: &OpenPosition) -> Result<()> {
        self.records.insert(ticker.to_string(), position.clone());
        Ok(())
    }

    async fn delete(&self, ticker: &str) -> Result<()> {
        self.records.remove(ticker);
        Ok(())
    }
}

/// The validation pipeline behind a swappable pointer. Readers take an `Arc`
/// snapshot; `reload` validates before it swaps.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<EnhancedValidationPipeline>>>,
}

impl SharedConfig {
    pub fn new(config: PeakDetectionConfig) -> Result<Self, ConfigError> {
        let pipeline = EnhancedValidationPipeline::new(config)?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(pipeline))),
        })
    }

    pub fn pipeline(&self) -> Arc<EnhancedValidationPipeline> {
        let guard = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn config(&self) -> PeakDetectionConfig {
        self.pipeline().config().clone()
    }

    /// Replace the configuration. An invalid config leaves the current one
    /// in place.
    pub fn reload(&self, config: PeakDetectionConfig) -> Result<(), ConfigError> {
        let pipeline = Arc::new(EnhancedValidationPipeline::new(config)?);
        let mut guard = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = pipeline;
        tracing::info!("Peak detection config reloaded");
        Ok(())
    }
}
