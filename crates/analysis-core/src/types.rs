use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub vwap: Option<f64>,
}

impl Bar {
    /// A bar is usable when every price is finite and positive, the high is not
    /// below the low and the volume is non-negative.
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0)
            && self.high >= self.low
            && self.volume.is_finite()
            && self.volume >= 0.0
    }
}

/// Quote data (bid/ask)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    #[serde(default)]
    pub bid_size: i64,
    #[serde(default)]
    pub ask_size: i64,
}

impl Quote {
    pub fn new(bid: f64, ask: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            bid,
            ask,
            bid_size: 0,
            ask_size: 0,
        }
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

/// Side of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
        }
    }

    /// Trend wording used in rejection messages.
    pub fn trend_label(&self) -> &'static str {
        match self {
            Direction::Long => "upward",
            Direction::Short => "downward",
        }
    }

    /// +1.0 for long, -1.0 for short. Multiplying a signed move by this gives
    /// the move in the position's favour.
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stochastic {
    pub k: f64,
    pub d: f64,
}

/// One indicator computation for one ticker at one instant.
///
/// Snapshots are produced by an external indicator service and never
/// synthesised by the engine. When a payload omits an indicator, the
/// deserialiser fills it with the same neutral value that
/// [`TechnicalSnapshot::neutral`] uses:
///
/// | field | default |
/// |---|---|
/// | `rsi` | 50 |
/// | `macd` | all zero |
/// | `bollinger` | all bands at `close_price` |
/// | `adx` | 0 |
/// | `ema_fast`, `ema_slow`, `vwap` | `close_price` |
/// | `volume`, `volume_sma` | 0 |
/// | `stoch` | 50 / 50 |
/// | `atr` | 0 |
/// | `bars` | empty |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SnapshotPayload")]
pub struct TechnicalSnapshot {
    pub close_price: f64,
    pub rsi: f64,
    pub macd: Macd,
    pub bollinger: Bollinger,
    pub adx: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub volume: f64,
    pub volume_sma: f64,
    pub stoch: Stochastic,
    pub atr: f64,
    pub vwap: f64,
    pub bars: Vec<Bar>,
}

impl TechnicalSnapshot {
    /// The documented default snapshot for a ticker whose indicators are
    /// unavailable. It scores no trend and no volume, so entry gates reject it.
    pub fn neutral(close_price: f64) -> Self {
        SnapshotPayload {
            close_price,
            ..SnapshotPayload::default()
        }
        .into()
    }

    /// `volume / volume_sma`, or 0 when the average is unknown.
    pub fn volume_ratio(&self) -> f64 {
        if self.volume_sma > 0.0 {
            self.volume / self.volume_sma
        } else {
            0.0
        }
    }

    /// Signed percentage distance of the close from VWAP.
    pub fn vwap_deviation_pct(&self) -> f64 {
        if self.vwap > 0.0 {
            (self.close_price - self.vwap) / self.vwap * 100.0
        } else {
            0.0
        }
    }

    /// Unsigned percentage gap between the fast and slow EMA.
    pub fn ema_diff_pct(&self) -> f64 {
        if self.ema_slow > 0.0 {
            (self.ema_fast - self.ema_slow).abs() / self.ema_slow * 100.0
        } else {
            0.0
        }
    }

    /// ATR as a percentage of the close.
    pub fn atr_pct(&self) -> f64 {
        if self.close_price > 0.0 {
            self.atr / self.close_price * 100.0
        } else {
            0.0
        }
    }
}

/// Wire shape of a snapshot: every indicator optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct SnapshotPayload {
    close_price: f64,
    #[serde(default)]
    rsi: Option<f64>,
    #[serde(default)]
    macd: Option<Macd>,
    #[serde(default)]
    bollinger: Option<Bollinger>,
    #[serde(default)]
    adx: Option<f64>,
    #[serde(default)]
    ema_fast: Option<f64>,
    #[serde(default)]
    ema_slow: Option<f64>,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    volume_sma: Option<f64>,
    #[serde(default)]
    stoch: Option<Stochastic>,
    #[serde(default)]
    atr: Option<f64>,
    #[serde(default)]
    vwap: Option<f64>,
    #[serde(default)]
    bars: Vec<Bar>,
}

impl From<SnapshotPayload> for TechnicalSnapshot {
    fn from(p: SnapshotPayload) -> Self {
        let close = p.close_price;
        Self {
            close_price: close,
            rsi: p.rsi.unwrap_or(50.0),
            macd: p.macd.unwrap_or(Macd {
                macd: 0.0,
                signal: 0.0,
                histogram: 0.0,
            }),
            bollinger: p.bollinger.unwrap_or(Bollinger {
                upper: close,
                middle: close,
                lower: close,
            }),
            adx: p.adx.unwrap_or(0.0),
            ema_fast: p.ema_fast.unwrap_or(close),
            ema_slow: p.ema_slow.unwrap_or(close),
            volume: p.volume.unwrap_or(0.0),
            volume_sma: p.volume_sma.unwrap_or(0.0),
            stoch: p.stoch.unwrap_or(Stochastic { k: 50.0, d: 50.0 }),
            atr: p.atr.unwrap_or(0.0),
            vwap: p.vwap.unwrap_or(close),
            bars: p.bars,
        }
    }
}

/// Bar-window trend summary
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendMetrics {
    /// Percentage move from the first to the last close of the window
    pub momentum_score: f64,
    pub peak_price: f64,
    pub bottom_price: f64,
}

impl TrendMetrics {
    /// Summarise the last `lookback` bars. Returns `None` for an empty window
    /// or a non-positive first close.
    pub fn from_bars(bars: &[Bar], lookback: usize) -> Option<Self> {
        let start = bars.len().saturating_sub(lookback);
        let window = &bars[start..];
        let first = window.first()?;
        let last = window.last()?;
        if first.close <= 0.0 {
            return None;
        }

        let peak_price = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let bottom_price = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);

        Some(Self {
            momentum_score: (last.close - first.close) / first.close * 100.0,
            peak_price,
            bottom_price,
        })
    }
}
