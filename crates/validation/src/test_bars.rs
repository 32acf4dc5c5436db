//! Bar builders shared by the stage tests.

use analysis_core::Bar;
use chrono::{Duration, TimeZone, Utc};

pub fn bar(i: i64, high: f64, close: f64, volume: f64) -> Bar {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
    Bar {
        timestamp: start + Duration::minutes(i),
        open: close,
        high,
        low: close.min(high) * 0.99,
        close,
        volume,
        vwap: None,
    }
}

pub fn bars_with_highs(highs: &[f64]) -> Vec<Bar> {
    highs
        .iter()
        .enumerate()
        .map(|(i, &h)| bar(i as i64, h, h - 0.02, 1_000.0))
        .collect()
}

pub fn bars_with_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| bar(i as i64, c * 1.005, c, 1_000.0))
        .collect()
}

pub fn bars_with_volumes(volumes: &[f64]) -> Vec<Bar> {
    volumes
        .iter()
        .enumerate()
        .map(|(i, &v)| bar(i as i64, 10.05, 10.0, v))
        .collect()
}
