//! Risk-Reward Ladder (RRL) accounting for The Vault Club.
//!
//! Everything in this crate is a pure function over decimal amounts: the weekly
//! profit calculator, the cross-pool routing engine, the deposit splitter, and
//! the epoch window / harvest yield arithmetic used by the accounting service.

pub mod amount;
pub mod epoch;
pub mod pools;
pub mod profit;
pub mod routing;
pub mod split;

pub use amount::{AmountTotal, format_amount, parse_amount, sum_amounts_lenient};
pub use epoch::{
    EPOCH_LENGTH_DAYS, EpochWindow, HARVEST_YIELD_RATE, harvest_yield, next_epoch_number,
};
pub use pools::{PoolBalances, PoolTier};
pub use profit::{WeeklyProfits, annual_rate, weekly_profits};
pub use routing::{
    RRL_POLICY, RoutedAmount, RouteShares, RoutingDetails, RoutingPolicy, RoutingResult,
    SourceRouting, WeeklyCycle, apply_weekly_cycle, route_profits,
};
pub use split::{DepositSplit, split_deposit};

/// Errors raised by ledger arithmetic and amount parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("amount is required")]
    MissingAmount,
    #[error("amount is not a decimal number: {0}")]
    InvalidAmount(String),
    #[error("amount must not be negative")]
    NegativeAmount,
    #[error("amount exceeds the maximum of {max}")]
    AmountTooLarge { max: String },
    #[error("pool balance for {tier} must not be negative")]
    NegativeBalance { tier: &'static str },
    #[error("routing policy for {tier} is invalid: {reason}")]
    InvalidPolicy { tier: &'static str, reason: String },
}
