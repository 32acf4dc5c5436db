//! Bid/ask conventions shared by entry scoring, exit evaluation and the
//! position lifecycle: positions are opened by crossing the spread and closed
//! the same way.

use analysis_core::{Direction, Quote};

/// Long entries buy at the ask, short entries sell at the bid.
pub fn entry_price(direction: Direction, quote: &Quote) -> f64 {
    match direction {
        Direction::Long => quote.ask,
        Direction::Short => quote.bid,
    }
}

/// Long exits sell at the bid, short exits buy back at the ask.
pub fn exit_price(direction: Direction, quote: &Quote) -> f64 {
    match direction {
        Direction::Long => quote.bid,
        Direction::Short => quote.ask,
    }
}

/// Profit or loss in percent of the entry price. Zero for a non-positive entry.
pub fn profit_loss_percent(direction: Direction, entry: f64, exit: f64) -> f64 {
    if entry.is_nan() || entry <= 0.0 || !exit.is_finite() {
        return 0.0;
    }
    match direction {
        Direction::Long => (exit - entry) / entry * 100.0,
        Direction::Short => (entry - exit) / entry * 100.0,
    }
}
