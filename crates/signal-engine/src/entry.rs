//! Entry scoring
//!
//! Six direction-mirrored factors are summed into a score in [0, 1]. A trend
//! confirmation gate runs first; golden-entry detection relaxes the
//! post-score gates and raises the allocation cap.

use analysis_core::{ConfigError, Direction, TechnicalSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::EntryScoringConfig;

pub const EMA_WEIGHT: f64 = 0.25;
pub const MACD_WEIGHT: f64 = 0.25;
pub const RSI_WEIGHT: f64 = 0.15;
pub const ADX_WEIGHT: f64 = 0.15;
pub const VWAP_WEIGHT: f64 = 0.10;
pub const VOLUME_WEIGHT: f64 = 0.10;

/// Per-factor contributions to an entry score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub ema: f64,
    pub macd: f64,
    pub rsi: f64,
    pub adx: f64,
    pub vwap: f64,
    pub volume: f64,
}

impl FactorBreakdown {
    pub fn total(&self) -> f64 {
        self.ema + self.macd + self.rsi + self.adx + self.vwap + self.volume
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoldenReason {
    EmaDivergence,
    MacdDominance,
    StrongAdx,
    VwapDivergence,
    VolumeSurge,
    OptimalRsi,
    ExceptionalScore,
}

impl fmt::Display for GoldenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GoldenReason::EmaDivergence => "Strong EMA divergence (>3%)",
            GoldenReason::MacdDominance => "MACD histogram dominance",
            GoldenReason::StrongAdx => "Very strong trend (ADX > 35)",
            GoldenReason::VwapDivergence => "Price well beyond VWAP (>2%)",
            GoldenReason::VolumeSurge => "Volume surge (>2x average)",
            GoldenReason::OptimalRsi => "RSI in optimal band",
            GoldenReason::ExceptionalScore => "Exceptional entry score",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryScore {
    pub score: f64,
    pub factors: FactorBreakdown,
    pub is_golden: bool,
    pub golden_reasons: Vec<GoldenReason>,
}

/// The five booleans of the trend confirmation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendConfirmation {
    pub ema_aligned: bool,
    pub macd_aligned: bool,
    pub vwap_aligned: bool,
    pub rsi_has_room: bool,
    pub adx_trending: bool,
}

impl TrendConfirmation {
    pub fn count(&self) -> usize {
        [
            self.ema_aligned,
            self.macd_aligned,
            self.vwap_aligned,
            self.rsi_has_room,
            self.adx_trending,
        ]
        .iter()
        .filter(|c| **c)
        .count()
    }
}

/// Final entry decision for a ticker that cleared every gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntrySignal {
    pub ticker: String,
    pub action: Direction,
    pub entry_score: f64,
    pub portfolio_allocation: f64,
    pub is_golden: bool,
    pub golden_reasons: Vec<GoldenReason>,
    pub factors: FactorBreakdown,
    pub created_at: DateTime<Utc>,
}

/// Why an entry was turned away.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryRejection {
    #[error("invalid snapshot: {field} is not usable")]
    InvalidSnapshot { field: String },

    #[error("not in {} trend ({confirmations}/5 confirmations, need {required})", trend_phrase(.direction))]
    NotInTrend {
        direction: Direction,
        confirmations: usize,
        required: usize,
    },

    #[error("EMA crossover too weak: {strength_pct:.3}% < {min_pct:.2}%")]
    WeakEmaCrossover { strength_pct: f64, min_pct: f64 },

    #[error("RSI {rsi:.1} outside [{low:.0}, {high:.0}]")]
    RsiOutOfRange { rsi: f64, low: f64, high: f64 },

    #[error("ADX {adx:.1} below {min:.0}")]
    WeakAdx { adx: f64, min: f64 },

    #[error("volume ratio {ratio:.2} below {min:.2}")]
    LowVolume { ratio: f64, min: f64 },

    #[error("VWAP deviation {deviation_pct:.2}% exceeds {max_pct:.2}%")]
    VwapDeviation { deviation_pct: f64, max_pct: f64 },

    #[error("price extended {premium_pct:.2}% beyond VWAP (max {max_pct:.2}%)")]
    VwapPremium { premium_pct: f64, max_pct: f64 },

    #[error("fast EMA {ema_fast:.4} below VWAP {vwap:.4}")]
    FastEmaBelowVwap { ema_fast: f64, vwap: f64 },

    #[error("entry score {score:.3} below threshold {threshold:.2}")]
    ScoreBelowThreshold { score: f64, threshold: f64 },
}

impl EntryRejection {
    pub fn kind(&self) -> &'static str {
        match self {
            EntryRejection::InvalidSnapshot { .. } => "invalid_snapshot",
            EntryRejection::NotInTrend { .. } => "not_in_trend",
            EntryRejection::WeakEmaCrossover { .. } => "weak_ema_crossover",
            EntryRejection::RsiOutOfRange { .. } => "rsi_out_of_range",
            EntryRejection::WeakAdx { .. } => "weak_adx",
            EntryRejection::LowVolume { .. } => "low_volume",
            EntryRejection::VwapDeviation { .. } => "vwap_deviation",
            EntryRejection::VwapPremium { .. } => "vwap_premium",
            EntryRejection::FastEmaBelowVwap { .. } => "fast_ema_below_vwap",
            EntryRejection::ScoreBelowThreshold { .. } => "score_below_threshold",
        }
    }
}

fn trend_phrase(direction: &Direction) -> &'static str {
    match direction {
        Direction::Long => "an upward",
        Direction::Short => "a downward",
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntryScorer {
    config: EntryScoringConfig,
}

impl EntryScorer {
    pub fn new(config: EntryScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EntryScoringConfig {
        &self.config
    }

    /// Weighted score, factor breakdown and golden classification.
    pub fn score(&self, snap: &TechnicalSnapshot, direction: Direction) -> EntryScore {
        let factors = FactorBreakdown {
            ema: ema_factor(snap, direction),
            macd: macd_factor(snap, direction),
            rsi: rsi_factor(snap.rsi, direction),
            adx: adx_factor(snap.adx),
            vwap: vwap_factor(snap, direction),
            volume: volume_factor(snap.volume_ratio()),
        };
        let total = factors.total();
        let score = if total.is_finite() {
            total.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut golden_reasons = golden_reasons(snap, direction);
        let is_golden = golden_reasons.len() >= self.config.golden_min_reasons
            || score >= self.config.exceptional_score;
        if score >= self.config.exceptional_score {
            golden_reasons.push(GoldenReason::ExceptionalScore);
        }

        tracing::debug!(
            "Entry score {}: {:.3} (ema={:.3} macd={:.3} rsi={:.3} adx={:.3} vwap={:.3} vol={:.3}) golden={}",
            direction,
            score,
            factors.ema,
            factors.macd,
            factors.rsi,
            factors.adx,
            factors.vwap,
            factors.volume,
            is_golden
        );

        EntryScore {
            score,
            factors,
            is_golden,
            golden_reasons,
        }
    }

    pub fn trend_confirmation(
        &self,
        snap: &TechnicalSnapshot,
        direction: Direction,
    ) -> TrendConfirmation {
        let sign = direction.sign();
        TrendConfirmation {
            ema_aligned: (snap.ema_fast - snap.ema_slow) * sign > 0.0,
            macd_aligned: snap.macd.histogram * sign > 0.0,
            vwap_aligned: (snap.close_price - snap.vwap) * sign > 0.0,
            rsi_has_room: match direction {
                Direction::Long => snap.rsi < 70.0,
                Direction::Short => snap.rsi > 30.0,
            },
            adx_trending: snap.adx > 25.0,
        }
    }

    /// Full entry decision: trend gate, scoring, post-score gates, allocation.
    pub fn evaluate(
        &self,
        ticker: &str,
        snap: &TechnicalSnapshot,
        direction: Direction,
    ) -> Result<EntrySignal, EntryRejection> {
        check_snapshot(snap)?;
        let cfg = &self.config;

        let trend = self.trend_confirmation(snap, direction);
        if trend.count() < cfg.min_trend_confirmations {
            return Err(EntryRejection::NotInTrend {
                direction,
                confirmations: trend.count(),
                required: cfg.min_trend_confirmations,
            });
        }

        let scored = self.score(snap, direction);
        self.check_gates(snap, direction, &scored)?;

        let portfolio_allocation =
            self.portfolio_allocation(snap, scored.score, scored.is_golden);

        tracing::info!(
            "{} {} entry accepted: score={:.3} allocation={:.2}% golden={}",
            ticker,
            direction,
            scored.score,
            portfolio_allocation * 100.0,
            scored.is_golden
        );

        Ok(EntrySignal {
            ticker: ticker.to_string(),
            action: direction,
            entry_score: scored.score,
            portfolio_allocation,
            is_golden: scored.is_golden,
            golden_reasons: scored.golden_reasons,
            factors: scored.factors,
            created_at: Utc::now(),
        })
    }

    fn check_gates(
        &self,
        snap: &TechnicalSnapshot,
        direction: Direction,
        scored: &EntryScore,
    ) -> Result<(), EntryRejection> {
        let cfg = &self.config;
        let golden = scored.is_golden;
        let sign = direction.sign();

        let strength_pct = if snap.ema_slow > 0.0 {
            (snap.ema_fast - snap.ema_slow) / snap.ema_slow * 100.0 * sign
        } else {
            0.0
        };
        if strength_pct < cfg.min_ema_strength_pct {
            return Err(EntryRejection::WeakEmaCrossover {
                strength_pct,
                min_pct: cfg.min_ema_strength_pct,
            });
        }

        let band = match direction {
            Direction::Long => cfg.long_rsi_band,
            Direction::Short => cfg.short_rsi_band,
        };
        if !band.contains(snap.rsi) {
            return Err(EntryRejection::RsiOutOfRange {
                rsi: snap.rsi,
                low: band.low,
                high: band.high,
            });
        }

        let min_adx = if golden { cfg.golden_min_adx } else { cfg.min_adx };
        if snap.adx < min_adx {
            return Err(EntryRejection::WeakAdx {
                adx: snap.adx,
                min: min_adx,
            });
        }

        let min_volume = if golden {
            cfg.golden_min_volume_ratio
        } else {
            cfg.min_volume_ratio
        };
        let ratio = snap.volume_ratio();
        if ratio < min_volume {
            return Err(EntryRejection::LowVolume {
                ratio,
                min: min_volume,
            });
        }

        let deviation_pct = snap.vwap_deviation_pct();
        let max_deviation = if golden {
            cfg.golden_max_vwap_deviation_pct
        } else {
            cfg.max_vwap_deviation_pct
        };
        if deviation_pct.abs() > max_deviation {
            return Err(EntryRejection::VwapDeviation {
                deviation_pct,
                max_pct: max_deviation,
            });
        }

        let premium_pct = deviation_pct * sign;
        let max_premium = if golden {
            cfg.golden_max_vwap_premium_pct
        } else {
            cfg.max_vwap_premium_pct
        };
        if premium_pct > max_premium {
            return Err(EntryRejection::VwapPremium {
                premium_pct,
                max_pct: max_premium,
            });
        }

        if direction == Direction::Long && snap.ema_fast < snap.vwap {
            return Err(EntryRejection::FastEmaBelowVwap {
                ema_fast: snap.ema_fast,
                vwap: snap.vwap,
            });
        }

        let threshold = if golden {
            cfg.golden_score_threshold
        } else {
            cfg.score_threshold
        };
        if scored.score < threshold {
            return Err(EntryRejection::ScoreBelowThreshold {
                score: scored.score,
                threshold,
            });
        }

        Ok(())
    }

    /// Fraction of the portfolio to commit, in [0, max_golden_allocation].
    pub fn portfolio_allocation(&self, snap: &TechnicalSnapshot, score: f64, is_golden: bool) -> f64 {
        let cfg = &self.config;
        let mut allocation = score.clamp(0.0, 1.0) * cfg.base_allocation_factor;

        if snap.adx > 30.0 {
            allocation += 0.01;
        }
        if snap.volume > 1.5 * snap.volume_sma {
            allocation += 0.01;
        }
        if (40.0..=60.0).contains(&snap.rsi) {
            allocation += 0.005;
        }
        if snap.macd.histogram.abs() > 0.5 * snap.macd.macd.abs() {
            allocation += 0.005;
        }

        allocation = allocation.min(cfg.max_allocation);
        if is_golden {
            allocation = (allocation * cfg.golden_allocation_multiplier).min(cfg.max_golden_allocation);
        }
        allocation.max(0.0)
    }
}

fn check_snapshot(snap: &TechnicalSnapshot) -> Result<(), EntryRejection> {
    let fields = [
        ("close_price", snap.close_price),
        ("rsi", snap.rsi),
        ("macd", snap.macd.macd),
        ("macd_signal", snap.macd.signal),
        ("macd_histogram", snap.macd.histogram),
        ("adx", snap.adx),
        ("ema_fast", snap.ema_fast),
        ("ema_slow", snap.ema_slow),
        ("volume", snap.volume),
        ("volume_sma", snap.volume_sma),
        ("vwap", snap.vwap),
    ];
    if let Some((field, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
        return Err(EntryRejection::InvalidSnapshot {
            field: field.to_string(),
        });
    }
    if snap.close_price <= 0.0 {
        return Err(EntryRejection::InvalidSnapshot {
            field: "close_price".to_string(),
        });
    }
    Ok(())
}

fn ema_factor(snap: &TechnicalSnapshot, direction: Direction) -> f64 {
    let favorable = (snap.ema_fast - snap.ema_slow) * direction.sign() > 0.0;
    if !favorable || snap.ema_slow <= 0.0 {
        return 0.0;
    }
    let diff_pct = snap.ema_diff_pct();
    if diff_pct > 1.0 {
        EMA_WEIGHT
    } else if diff_pct > 0.5 {
        0.20
    } else if diff_pct > 0.1 {
        0.15
    } else {
        0.10
    }
}

fn macd_factor(snap: &TechnicalSnapshot, direction: Direction) -> f64 {
    let sign = direction.sign();
    let m = &snap.macd;
    if m.histogram * sign > 0.0 {
        MACD_WEIGHT * (m.histogram.abs() / (m.macd.abs() + 0.001)).min(1.0)
    } else if (m.macd - m.signal) * sign > 0.0 {
        0.15
    } else {
        0.0
    }
}

fn rsi_factor(rsi: f64, direction: Direction) -> f64 {
    if (40.0..=60.0).contains(&rsi) {
        return RSI_WEIGHT;
    }
    match direction {
        Direction::Long => {
            if rsi > 60.0 && rsi <= 70.0 {
                0.10
            } else if (30.0..40.0).contains(&rsi) {
                0.08
            } else if rsi < 30.0 {
                0.05
            } else {
                0.0
            }
        }
        Direction::Short => {
            if (30.0..40.0).contains(&rsi) {
                0.10
            } else if rsi > 60.0 && rsi <= 70.0 {
                0.08
            } else if rsi > 70.0 {
                0.05
            } else {
                0.0
            }
        }
    }
}

fn adx_factor(adx: f64) -> f64 {
    if adx > 30.0 {
        ADX_WEIGHT * (adx / 50.0).min(1.0)
    } else if adx > 25.0 {
        (ADX_WEIGHT * adx / 40.0).min(0.12)
    } else if adx > 20.0 {
        0.08
    } else {
        0.0
    }
}

fn vwap_factor(snap: &TechnicalSnapshot, direction: Direction) -> f64 {
    if snap.vwap <= 0.0 {
        return 0.0;
    }
    let favorable_dev = snap.vwap_deviation_pct() * direction.sign();
    if favorable_dev > 0.0 {
        VWAP_WEIGHT * favorable_dev.min(2.0) / 2.0
    } else if favorable_dev >= -1.0 {
        0.02
    } else {
        0.0
    }
}

fn volume_factor(ratio: f64) -> f64 {
    if ratio > 2.0 {
        (VOLUME_WEIGHT * ratio / 3.0).min(VOLUME_WEIGHT)
    } else if ratio > 1.5 {
        0.08
    } else if ratio > 1.2 {
        0.05
    } else {
        0.0
    }
}

fn golden_reasons(snap: &TechnicalSnapshot, direction: Direction) -> Vec<GoldenReason> {
    let sign = direction.sign();
    let mut reasons = Vec::new();

    if (snap.ema_fast - snap.ema_slow) * sign > 0.0 && snap.ema_diff_pct() > 3.0 {
        reasons.push(GoldenReason::EmaDivergence);
    }
    if snap.macd.histogram * sign > 0.0
        && snap.macd.histogram.abs() > 0.5 * snap.macd.macd.abs()
    {
        reasons.push(GoldenReason::MacdDominance);
    }
    if snap.adx > 35.0 {
        reasons.push(GoldenReason::StrongAdx);
    }
    if snap.vwap_deviation_pct() * sign > 2.0 {
        reasons.push(GoldenReason::VwapDivergence);
    }
    if snap.volume_ratio() > 2.0 {
        reasons.push(GoldenReason::VolumeSurge);
    }
    let optimal_rsi = match direction {
        Direction::Long => (50.0..=60.0).contains(&snap.rsi),
        Direction::Short => (40.0..=50.0).contains(&snap.rsi),
    };
    if optimal_rsi {
        reasons.push(GoldenReason::OptimalRsi);
    }

    reasons
}
