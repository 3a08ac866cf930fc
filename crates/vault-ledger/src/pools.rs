use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::LedgerError;
use crate::routing::RoutingResult;
use crate::split::DepositSplit;

/// One of the three risk tiers of the ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolTier {
    P1,
    P2,
    P3,
}

impl PoolTier {
    pub const ALL: [PoolTier; 3] = [PoolTier::P1, PoolTier::P2, PoolTier::P3];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P1 => "p1",
            Self::P2 => "p2",
            Self::P3 => "p3",
        }
    }
}

impl std::fmt::Display for PoolTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Balances of the three pools, in the unit of account.
///
/// Fields are private so the ledger can only move through a deposit
/// allocation or a routing result; every constructor rejects negatives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PoolBalancesWire")]
pub struct PoolBalances {
    p1: Decimal,
    p2: Decimal,
    p3: Decimal,
}

#[derive(Deserialize)]
struct PoolBalancesWire {
    p1: Decimal,
    p2: Decimal,
    p3: Decimal,
}

impl TryFrom<PoolBalancesWire> for PoolBalances {
    type Error = LedgerError;

    fn try_from(value: PoolBalancesWire) -> Result<Self, Self::Error> {
        Self::try_new(value.p1, value.p2, value.p3)
    }
}

impl PoolBalances {
    pub const ZERO: PoolBalances = PoolBalances {
        p1: Decimal::ZERO,
        p2: Decimal::ZERO,
        p3: Decimal::ZERO,
    };

    pub fn try_new(p1: Decimal, p2: Decimal, p3: Decimal) -> Result<Self, LedgerError> {
        for (tier, value) in [(PoolTier::P1, p1), (PoolTier::P2, p2), (PoolTier::P3, p3)] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(LedgerError::NegativeBalance {
                    tier: tier.as_str(),
                });
            }
        }
        Ok(Self { p1, p2, p3 })
    }

    pub fn p1(&self) -> Decimal {
        self.p1
    }

    pub fn p2(&self) -> Decimal {
        self.p2
    }

    pub fn p3(&self) -> Decimal {
        self.p3
    }

    pub fn get(&self, tier: PoolTier) -> Decimal {
        match tier {
            PoolTier::P1 => self.p1,
            PoolTier::P2 => self.p2,
            PoolTier::P3 => self.p3,
        }
    }

    pub fn total(&self) -> Decimal {
        self.p1 + self.p2 + self.p3
    }

    /// Adds a deposit allocation to each pool.
    #[must_use]
    pub fn credit_deposit(&self, split: &DepositSplit) -> Self {
        Self {
            p1: self.p1 + split.p1_amount,
            p2: self.p2 + split.p2_amount,
            p3: self.p3 + split.p3_amount,
        }
    }

    /// Adds the per-pool net change of one routing step.
    #[must_use]
    pub fn apply_routing(&self, routing: &RoutingResult) -> Self {
        Self {
            p1: self.p1 + routing.p1_net_change,
            p2: self.p2 + routing.p2_net_change,
            p3: self.p3 + routing.p3_net_change,
        }
    }

    /// Rounds every pool to `dp` decimal places (banker's rounding).
    #[must_use]
    pub fn round_dp(&self, dp: u32) -> Self {
        Self {
            p1: self.p1.round_dp(dp),
            p2: self.p2.round_dp(dp),
            p3: self.p3.round_dp(dp),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{PoolBalances, PoolTier};
    use crate::LedgerError;
    use crate::split::split_deposit;

    #[test]
    fn negative_balances_are_rejected() {
        let result = PoolBalances::try_new(dec!(1), dec!(-0.01), dec!(0));
        assert_eq!(result, Err(LedgerError::NegativeBalance { tier: "p2" }));
    }

    #[test]
    fn deposit_credit_moves_each_pool_by_its_share() -> Result<(), LedgerError> {
        let split = split_deposit(dec!(100))?;
        let balances = PoolBalances::ZERO.credit_deposit(&split);
        assert_eq!(balances.get(PoolTier::P1), dec!(60));
        assert_eq!(balances.get(PoolTier::P2), dec!(10));
        assert_eq!(balances.get(PoolTier::P3), dec!(30));
        assert_eq!(balances.total(), dec!(100));
        Ok(())
    }

    #[test]
    fn deserialize_rejects_negative_pool() {
        let parsed = serde_json::from_str::<PoolBalances>(r#"{"p1":"1","p2":"2","p3":"-3"}"#);
        assert!(parsed.is_err());

        let parsed = serde_json::from_str::<PoolBalances>(r#"{"p1":"1","p2":"2","p3":"3"}"#);
        assert!(matches!(parsed, Ok(balances) if balances.total() == dec!(6)));
    }
}
