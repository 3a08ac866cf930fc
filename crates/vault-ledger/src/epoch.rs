use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const EPOCH_LENGTH_DAYS: i64 = 7;

/// Share of an epoch's deposits paid out as harvest yield.
pub const HARVEST_YIELD_RATE: Decimal = dec!(0.01);

/// Half-open time window `[starts_at, ends_at)` of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl EpochWindow {
    /// The window that begins at UTC midnight of `now`'s day.
    pub fn starting_at_midnight_of(now: DateTime<Utc>) -> Self {
        let starts_at = now.date_naive().and_time(NaiveTime::MIN).and_utc();
        Self {
            starts_at,
            ends_at: starts_at + Duration::days(EPOCH_LENGTH_DAYS),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }

    /// True once the window has fully elapsed.
    pub fn is_closed_at(&self, at: DateTime<Utc>) -> bool {
        self.ends_at <= at
    }
}

/// Epoch numbers are the creation instant in Unix seconds, bumped past the
/// previous number when two epochs are created within the same second.
pub fn next_epoch_number(now: DateTime<Utc>, last: Option<i64>) -> i64 {
    let candidate = now.timestamp();
    match last {
        Some(last) if candidate <= last => last.saturating_add(1),
        _ => candidate,
    }
}

pub fn harvest_yield(deposits_total: Decimal) -> Decimal {
    (deposits_total * HARVEST_YIELD_RATE).normalize()
}

#[cfg(test)]
mod tests {
    use anyhow::{Context, Result};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::{EpochWindow, harvest_yield, next_epoch_number};
    use crate::amount::sum_amounts_lenient;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Result<DateTime<Utc>> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .context("valid test timestamp")
    }

    #[test]
    fn window_is_anchored_at_utc_midnight() -> Result<()> {
        let now = at(2025, 3, 12, 15, 45)?;
        let midnight = at(2025, 3, 12, 0, 0)?;
        let window = EpochWindow::starting_at_midnight_of(now);
        assert_eq!(window.starts_at, midnight);
        assert_eq!(window.ends_at, midnight + Duration::days(7));
        assert!(window.contains(now));
        assert!(window.contains(midnight));
        assert!(!window.contains(window.ends_at));
        assert!(window.is_closed_at(window.ends_at));
        assert!(!window.is_closed_at(now));
        Ok(())
    }

    #[test]
    fn epoch_numbers_strictly_increase() -> Result<()> {
        let now = at(2025, 3, 12, 15, 45)?;
        let first = next_epoch_number(now, None);
        assert_eq!(first, now.timestamp());
        let second = next_epoch_number(now, Some(first));
        assert_eq!(second, first + 1);
        let later = next_epoch_number(now + Duration::days(7), Some(second));
        assert!(later > second);
        Ok(())
    }

    #[test]
    fn yield_is_one_percent_of_deposits() {
        let total = sum_amounts_lenient(["40", "60"]);
        assert_eq!(harvest_yield(total.total).to_string(), "1");
        assert_eq!(harvest_yield(dec!(0)), dec!(0));
        assert_eq!(harvest_yield(dec!(12.34)), dec!(0.1234));
    }
}
