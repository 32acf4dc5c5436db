use std::sync::Mutex;

use chrono::{NaiveDate, Utc};

/// Caps new entries per trading day. Golden entries are never blocked, but
/// they still count toward the day's total.
#[derive(Debug)]
pub struct DailyTradeLimiter {
    max_daily_trades: usize,
    state: Mutex<DayCount>,
}

#[derive(Debug, Clone, Copy)]
struct DayCount {
    day: NaiveDate,
    trades: usize,
}

impl DailyTradeLimiter {
    pub fn new(max_daily_trades: usize) -> Self {
        Self {
            max_daily_trades,
            state: Mutex::new(DayCount {
                day: Utc::now().date_naive(),
                trades: 0,
            }),
        }
    }

    pub fn max_daily_trades(&self) -> usize {
        self.max_daily_trades
    }

    pub fn allows(&self, is_golden: bool) -> bool {
        self.allows_on(Utc::now().date_naive(), is_golden)
    }

    pub fn record_trade(&self) -> usize {
        self.record_trade_on(Utc::now().date_naive())
    }

    pub fn trades_today(&self) -> usize {
        self.with_day(Utc::now().date_naive(), |count| count.trades)
    }

    pub(crate) fn allows_on(&self, day: NaiveDate, is_golden: bool) -> bool {
        if is_golden {
            return true;
        }
        self.with_day(day, |count| count.trades < self.max_daily_trades)
    }

    pub(crate) fn record_trade_on(&self, day: NaiveDate) -> usize {
        let trades = self.with_day(day, |count| {
            count.trades += 1;
            count.trades
        });
        tracing::debug!("Trades today: {}/{}", trades, self.max_daily_trades);
        trades
    }

    fn with_day<T>(&self, day: NaiveDate, f: impl FnOnce(&mut DayCount) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.day != day {
            *guard = DayCount { day, trades: 0 };
        }
        f(&mut guard)
    }
}
