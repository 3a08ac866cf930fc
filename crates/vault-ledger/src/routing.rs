//! Cross-pool profit routing for the Risk-Reward Ladder.
//!
//! Each pool's weekly profit is partly reinvested in place and partly sent to
//! the other pools. The shares live in a fixed [`RoutingPolicy`] table so the
//! policy can be audited (and validated) independently of the arithmetic.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::LedgerError;
use crate::pools::{PoolBalances, PoolTier};
use crate::profit::{WeeklyProfits, weekly_profits};

/// Shares of one source pool's profit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteShares {
    pub reinvest: Decimal,
    pub outflows: &'static [(PoolTier, Decimal)],
}

impl RouteShares {
    pub fn total(&self) -> Decimal {
        self.outflows
            .iter()
            .fold(self.reinvest, |sum, (_, share)| sum + *share)
    }
}

pub const P1_ROUTES: RouteShares = RouteShares {
    reinvest: dec!(0.5),
    outflows: &[(PoolTier::P2, dec!(0.4)), (PoolTier::P3, dec!(0.1))],
};

pub const P2_ROUTES: RouteShares = RouteShares {
    reinvest: dec!(0.5),
    outflows: &[(PoolTier::P1, dec!(0.2)), (PoolTier::P3, dec!(0.3))],
};

pub const P3_ROUTES: RouteShares = RouteShares {
    reinvest: dec!(0.7),
    outflows: &[(PoolTier::P1, dec!(0.3))],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub p1: RouteShares,
    pub p2: RouteShares,
    pub p3: RouteShares,
}

/// The production ladder.
pub const RRL_POLICY: RoutingPolicy = RoutingPolicy {
    p1: P1_ROUTES,
    p2: P2_ROUTES,
    p3: P3_ROUTES,
};

impl RoutingPolicy {
    pub fn shares(&self, source: PoolTier) -> &RouteShares {
        match source {
            PoolTier::P1 => &self.p1,
            PoolTier::P2 => &self.p2,
            PoolTier::P3 => &self.p3,
        }
    }

    /// Checks that each row is non-negative, never routes a pool to itself,
    /// and sums to exactly one.
    pub fn validate(&self) -> Result<(), LedgerError> {
        for source in PoolTier::ALL {
            let shares = self.shares(source);
            let invalid = |reason: &str| LedgerError::InvalidPolicy {
                tier: source.as_str(),
                reason: reason.to_string(),
            };
            if shares.reinvest.is_sign_negative() && !shares.reinvest.is_zero() {
                return Err(invalid("negative reinvest share"));
            }
            for (target, share) in shares.outflows {
                if *target == source {
                    return Err(invalid("outflow routes back to its source"));
                }
                if share.is_sign_negative() && !share.is_zero() {
                    return Err(invalid("negative outflow share"));
                }
            }
            let total = shares.total();
            if total != Decimal::ONE {
                return Err(invalid(&format!("shares sum to {total}, expected 1")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedAmount {
    pub to: PoolTier,
    pub amount: Decimal,
}

/// What happened to one source pool's profit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRouting {
    pub source: PoolTier,
    pub profit: Decimal,
    pub reinvest: Decimal,
    pub outflows: Vec<RoutedAmount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDetails {
    pub p1: SourceRouting,
    pub p2: SourceRouting,
    pub p3: SourceRouting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingResult {
    pub p1_net_change: Decimal,
    pub p2_net_change: Decimal,
    pub p3_net_change: Decimal,
    pub routing_details: RoutingDetails,
}

impl RoutingResult {
    pub fn net_change(&self, tier: PoolTier) -> Decimal {
        match tier {
            PoolTier::P1 => self.p1_net_change,
            PoolTier::P2 => self.p2_net_change,
            PoolTier::P3 => self.p3_net_change,
        }
    }

    pub fn total_net_change(&self) -> Decimal {
        self.p1_net_change + self.p2_net_change + self.p3_net_change
    }
}

fn route_source(policy: &RoutingPolicy, source: PoolTier, profit: Decimal) -> SourceRouting {
    let shares = policy.shares(source);
    let outflows: Vec<RoutedAmount> = shares
        .outflows
        .iter()
        .map(|(to, share)| RoutedAmount {
            to: *to,
            amount: profit * *share,
        })
        .collect();
    // The reinvested part absorbs rounding so the row conserves its input.
    let routed = outflows
        .iter()
        .fold(Decimal::ZERO, |sum, routed| sum + routed.amount);
    SourceRouting {
        source,
        profit,
        reinvest: profit - routed,
        outflows,
    }
}

/// Routes the weekly profits through the production ladder.
pub fn route_profits(profits: &WeeklyProfits) -> RoutingResult {
    route_profits_with_policy(&RRL_POLICY, profits)
}

pub fn route_profits_with_policy(policy: &RoutingPolicy, profits: &WeeklyProfits) -> RoutingResult {
    let details = RoutingDetails {
        p1: route_source(policy, PoolTier::P1, profits.p1_profit),
        p2: route_source(policy, PoolTier::P2, profits.p2_profit),
        p3: route_source(policy, PoolTier::P3, profits.p3_profit),
    };

    let mut net = [Decimal::ZERO; 3];
    for routing in [&details.p1, &details.p2, &details.p3] {
        net[tier_index(routing.source)] += routing.reinvest;
        for outflow in &routing.outflows {
            net[tier_index(outflow.to)] += outflow.amount;
        }
    }

    RoutingResult {
        p1_net_change: net[0],
        p2_net_change: net[1],
        p3_net_change: net[2],
        routing_details: details,
    }
}

fn tier_index(tier: PoolTier) -> usize {
    match tier {
        PoolTier::P1 => 0,
        PoolTier::P2 => 1,
        PoolTier::P3 => 2,
    }
}

/// One harvest-time pass over the pool ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyCycle {
    pub before: PoolBalances,
    pub profits: WeeklyProfits,
    pub routing: RoutingResult,
    pub after: PoolBalances,
}

/// Computes weekly profits, routes them, and applies the net changes.
pub fn apply_weekly_cycle(balances: &PoolBalances) -> WeeklyCycle {
    let profits = weekly_profits(balances);
    let routing = route_profits(&profits);
    let after = balances.apply_routing(&routing);
    WeeklyCycle {
        before: *balances,
        profits,
        routing,
        after,
    }
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{
        RRL_POLICY, RouteShares, RoutingPolicy, apply_weekly_cycle, route_profits,
        route_profits_with_policy,
    };
    use crate::LedgerError;
    use crate::pools::{PoolBalances, PoolTier};
    use crate::profit::WeeklyProfits;

    fn profits(p1: Decimal, p2: Decimal, p3: Decimal) -> WeeklyProfits {
        WeeklyProfits {
            p1_profit: p1,
            p2_profit: p2,
            p3_profit: p3,
        }
    }

    #[test]
    fn production_policy_rows_sum_to_one() {
        assert_eq!(RRL_POLICY.validate(), Ok(()));
    }

    const LEAKY_P2_OUTFLOWS: &[(PoolTier, Decimal)] = &[(PoolTier::P1, dec!(0.2))];
    const SELF_ROUTED_P3_OUTFLOWS: &[(PoolTier, Decimal)] = &[(PoolTier::P3, dec!(0.3))];

    #[test]
    fn validate_flags_rows_that_leak_value() {
        let leaky = RoutingPolicy {
            p2: RouteShares {
                reinvest: dec!(0.5),
                outflows: LEAKY_P2_OUTFLOWS,
            },
            ..RRL_POLICY
        };
        assert!(matches!(
            leaky.validate(),
            Err(LedgerError::InvalidPolicy { tier: "p2", .. })
        ));

        let self_route = RoutingPolicy {
            p3: RouteShares {
                reinvest: dec!(0.7),
                outflows: SELF_ROUTED_P3_OUTFLOWS,
            },
            ..RRL_POLICY
        };
        assert!(matches!(
            self_route.validate(),
            Err(LedgerError::InvalidPolicy { tier: "p3", .. })
        ));
    }

    #[test]
    fn p1_profit_is_split_half_reinvested() {
        let result = route_profits(&profits(dec!(1), dec!(0), dec!(0)));
        assert_eq!(result.p1_net_change, dec!(0.5));
        assert_eq!(result.p2_net_change, dec!(0.4));
        assert_eq!(result.p3_net_change, dec!(0.1));
        assert_eq!(result.routing_details.p1.reinvest, dec!(0.5));
        assert_eq!(result.routing_details.p1.outflows.len(), 2);
    }

    #[test]
    fn p2_and_p3_rows_follow_the_ladder() {
        let result = route_profits(&profits(dec!(0), dec!(10), dec!(0)));
        assert_eq!(result.p1_net_change, dec!(2));
        assert_eq!(result.p2_net_change, dec!(5));
        assert_eq!(result.p3_net_change, dec!(3));

        let result = route_profits(&profits(dec!(0), dec!(0), dec!(10)));
        assert_eq!(result.p1_net_change, dec!(3));
        assert_eq!(result.p2_net_change, dec!(0));
        assert_eq!(result.p3_net_change, dec!(7));
    }

    #[test]
    fn zero_profits_route_to_zero() {
        let result = route_profits(&WeeklyProfits::default());
        for tier in PoolTier::ALL {
            assert!(result.net_change(tier).is_zero());
        }
    }

    #[test]
    fn weekly_cycle_adds_net_change_to_each_pool() -> Result<(), LedgerError> {
        let balances = PoolBalances::try_new(dec!(1000), dec!(1000), dec!(1000))?;
        let cycle = apply_weekly_cycle(&balances);
        for tier in PoolTier::ALL {
            assert_eq!(
                cycle.after.get(tier),
                balances.get(tier) + cycle.routing.net_change(tier)
            );
        }
        let drift = (cycle.routing.total_net_change() - cycle.profits.total()).abs();
        assert!(drift <= dec!(0.000000000000000001));
        Ok(())
    }

    fn routing_conserves_value(p1: u32, p2: u32, p3: u32) -> bool {
        let input = profits(
            Decimal::new(i64::from(p1), 2),
            Decimal::new(i64::from(p2), 2),
            Decimal::new(i64::from(p3), 2),
        );
        let result = route_profits_with_policy(&RRL_POLICY, &input);
        let rows_conserve = [
            &result.routing_details.p1,
            &result.routing_details.p2,
            &result.routing_details.p3,
        ]
        .iter()
        .all(|row| {
            let routed = row
                .outflows
                .iter()
                .fold(row.reinvest, |sum, outflow| sum + outflow.amount);
            routed == row.profit
        });
        let drift = (result.total_net_change() - input.total()).abs();
        rows_conserve && drift <= dec!(0.000000000000000001)
    }

    #[test]
    fn routing_never_creates_or_destroys_value() {
        quickcheck(routing_conserves_value as fn(u32, u32, u32) -> bool);
    }
}
