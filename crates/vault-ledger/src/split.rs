use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::LedgerError;

pub const P1_DEPOSIT_RATIO: Decimal = dec!(0.6);
pub const P2_DEPOSIT_RATIO: Decimal = dec!(0.1);
pub const P3_DEPOSIT_RATIO: Decimal = dec!(0.3);

/// How one deposit is allocated across the pools.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSplit {
    pub p1_amount: Decimal,
    pub p2_amount: Decimal,
    pub p3_amount: Decimal,
}

impl DepositSplit {
    pub fn total(&self) -> Decimal {
        self.p1_amount + self.p2_amount + self.p3_amount
    }
}

/// Splits a deposit 60/10/30. P3 takes the remainder so the parts always add
/// back up to `amount`.
pub fn split_deposit(amount: Decimal) -> Result<DepositSplit, LedgerError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::NegativeAmount);
    }
    let p1_amount = amount * P1_DEPOSIT_RATIO;
    let p2_amount = amount * P2_DEPOSIT_RATIO;
    Ok(DepositSplit {
        p1_amount,
        p2_amount,
        p3_amount: amount - p1_amount - p2_amount,
    })
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{P1_DEPOSIT_RATIO, P2_DEPOSIT_RATIO, P3_DEPOSIT_RATIO, split_deposit};
    use crate::LedgerError;

    #[test]
    fn ratios_close_to_one() {
        assert_eq!(P1_DEPOSIT_RATIO + P2_DEPOSIT_RATIO + P3_DEPOSIT_RATIO, Decimal::ONE);
    }

    #[test]
    fn hundred_splits_sixty_ten_thirty() -> Result<(), LedgerError> {
        let split = split_deposit(dec!(100))?;
        assert_eq!(split.p1_amount, dec!(60));
        assert_eq!(split.p2_amount, dec!(10));
        assert_eq!(split.p3_amount, dec!(30));
        Ok(())
    }

    #[test]
    fn zero_splits_to_zero() -> Result<(), LedgerError> {
        let split = split_deposit(Decimal::ZERO)?;
        assert!(split.total().is_zero());
        Ok(())
    }

    #[test]
    fn negative_amounts_are_rejected() {
        assert_eq!(split_deposit(dec!(-1)), Err(LedgerError::NegativeAmount));
    }

    fn split_sums_to_input(cents: u64) -> bool {
        let amount = Decimal::new(i64::try_from(cents % 1_000_000_000_000_000).unwrap_or(0), 2);
        match split_deposit(amount) {
            Ok(split) => split.total() == amount,
            Err(_) => false,
        }
    }

    #[test]
    fn parts_always_add_back_to_the_deposit() {
        quickcheck(split_sums_to_input as fn(u64) -> bool);
    }
}
