use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Counters for the decision engine. Shared by reference across tasks and
/// rayon workers; every update is lock-free or per-key.
#[derive(Debug)]
pub struct DecisionMetrics {
    cycles_run: AtomicU64,
    entries_evaluated: AtomicU64,
    signals_generated: AtomicU64,
    golden_signals: AtomicU64,
    exits_evaluated: AtomicU64,
    positions_closed: AtomicU64,
    rejections: DashMap<&'static str, u64>,
    exit_reasons: DashMap<&'static str, u64>,
    log_interval_cycles: u64,
}

impl DecisionMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            cycles_run: AtomicU64::new(0),
            entries_evaluated: AtomicU64::new(0),
            signals_generated: AtomicU64::new(0),
            golden_signals: AtomicU64::new(0),
            exits_evaluated: AtomicU64::new(0),
            positions_closed: AtomicU64::new(0),
            rejections: DashMap::new(),
            exit_reasons: DashMap::new(),
            log_interval_cycles,
        }
    }

    pub fn record_entry_evaluation(&self) {
        self.entries_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_signal(&self, is_golden: bool) {
        self.signals_generated.fetch_add(1, Ordering::Relaxed);
        if is_golden {
            self.golden_signals.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_rejection(&self, kind: &'static str) {
        *self.rejections.entry(kind).or_insert(0) += 1;
    }

    pub fn record_exit_evaluation(&self) {
        self.exits_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self, reason_kinds: impl IntoIterator<Item = &'static str>) {
        self.positions_closed.fetch_add(1, Ordering::Relaxed);
        for kind in reason_kinds {
            *self.exit_reasons.entry(kind).or_insert(0) += 1;
        }
    }

    /// Count a completed engine cycle and emit the summary every
    /// `log_interval_cycles`.
    pub fn finish_cycle(&self) {
        let cycles = self.cycles_run.fetch_add(1, Ordering::Relaxed) + 1;
        if self.log_interval_cycles > 0 && cycles % self.log_interval_cycles == 0 {
            self.log_metrics();
        }
    }

    pub fn signals_generated(&self) -> u64 {
        self.signals_generated.load(Ordering::Relaxed)
    }

    pub fn positions_closed(&self) -> u64 {
        self.positions_closed.load(Ordering::Relaxed)
    }

    pub fn rejection_count(&self, kind: &str) -> u64 {
        self.rejections.get(kind).map(|c| *c).unwrap_or(0)
    }

    pub fn exit_count(&self, kind: &str) -> u64 {
        self.exit_reasons.get(kind).map(|c| *c).unwrap_or(0)
    }

    /// Signal rate over evaluated entries (0-100%)
    pub fn signal_rate(&self) -> f64 {
        let evaluated = self.entries_evaluated.load(Ordering::Relaxed);
        if evaluated == 0 {
            return 0.0;
        }
        self.signals_generated() as f64 / evaluated as f64 * 100.0
    }

    /// Emit structured telemetry via tracing
    pub fn log_metrics(&self) {
        tracing::info!(
            cycles = self.cycles_run.load(Ordering::Relaxed),
            entries_evaluated = self.entries_evaluated.load(Ordering::Relaxed),
            signals_generated = self.signals_generated(),
            golden_signals = self.golden_signals.load(Ordering::Relaxed),
            signal_rate = format!("{:.1}%", self.signal_rate()),
            exits_evaluated = self.exits_evaluated.load(Ordering::Relaxed),
            positions_closed = self.positions_closed(),
            rejections = ?sorted(&self.rejections),
            exit_reasons = ?sorted(&self.exit_reasons),
            "Decision metrics summary"
        );
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "cycles_run": self.cycles_run.load(Ordering::Relaxed),
            "entries_evaluated": self.entries_evaluated.load(Ordering::Relaxed),
            "signals_generated": self.signals_generated(),
            "golden_signals": self.golden_signals.load(Ordering::Relaxed),
            "exits_evaluated": self.exits_evaluated.load(Ordering::Relaxed),
            "positions_closed": self.positions_closed(),
            "rejections": sorted(&self.rejections),
            "exit_reasons": sorted(&self.exit_reasons),
        })
    }
}

fn sorted(counts: &DashMap<&'static str, u64>) -> BTreeMap<&'static str, u64> {
    counts.iter().map(|e| (*e.key(), *e.value())).collect()
}
