use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::pools::{PoolBalances, PoolTier};

pub const WEEKS_PER_YEAR: Decimal = dec!(52);

/// Annualized rate of the conservative tier (5.2%).
pub const P1_ANNUAL_RATE: Decimal = dec!(0.052);
/// Annualized rate of the balanced tier (10.2%).
pub const P2_ANNUAL_RATE: Decimal = dec!(0.102);
/// Annualized rate of the aggressive tier (12.5%).
pub const P3_ANNUAL_RATE: Decimal = dec!(0.125);

pub fn annual_rate(tier: PoolTier) -> Decimal {
    match tier {
        PoolTier::P1 => P1_ANNUAL_RATE,
        PoolTier::P2 => P2_ANNUAL_RATE,
        PoolTier::P3 => P3_ANNUAL_RATE,
    }
}

/// Profit each pool earns over one week at its fixed rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyProfits {
    pub p1_profit: Decimal,
    pub p2_profit: Decimal,
    pub p3_profit: Decimal,
}

impl WeeklyProfits {
    pub fn get(&self, tier: PoolTier) -> Decimal {
        match tier {
            PoolTier::P1 => self.p1_profit,
            PoolTier::P2 => self.p2_profit,
            PoolTier::P3 => self.p3_profit,
        }
    }

    pub fn total(&self) -> Decimal {
        self.p1_profit + self.p2_profit + self.p3_profit
    }
}

pub fn weekly_profit(balance: Decimal, annual_rate: Decimal) -> Decimal {
    balance * (annual_rate / WEEKS_PER_YEAR)
}

pub fn weekly_profits(balances: &PoolBalances) -> WeeklyProfits {
    WeeklyProfits {
        p1_profit: weekly_profit(balances.p1(), annual_rate(PoolTier::P1)),
        p2_profit: weekly_profit(balances.p2(), annual_rate(PoolTier::P2)),
        p3_profit: weekly_profit(balances.p3(), annual_rate(PoolTier::P3)),
    }
}
