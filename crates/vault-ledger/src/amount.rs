use std::str::FromStr;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::LedgerError;

/// Upper bound on a single amount accepted at the API edge.
pub const MAX_AMOUNT: Decimal = dec!(1000000000000000);

/// Parses a decimal amount as sent by clients: plain (`"12.50"`) or
/// scientific (`"1.25e1"`) notation, surrounding whitespace ignored.
pub fn parse_amount(raw: &str) -> Result<Decimal, LedgerError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::MissingAmount);
    }
    let value = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| LedgerError::InvalidAmount(trimmed.to_string()))?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(LedgerError::NegativeAmount);
    }
    if value > MAX_AMOUNT {
        return Err(LedgerError::AmountTooLarge {
            max: MAX_AMOUNT.to_string(),
        });
    }
    Ok(value.normalize())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AmountTotal {
    pub total: Decimal,
    pub rows: usize,
    pub malformed: usize,
}

/// Sums stored amounts; malformed rows (and any that would overflow the sum)
/// count as zero and are tallied.
pub fn sum_amounts_lenient<'a, I>(amounts: I) -> AmountTotal
where
    I: IntoIterator<Item = &'a str>,
{
    amounts
        .into_iter()
        .fold(AmountTotal::default(), |mut acc, raw| {
            acc.rows += 1;
            let trimmed = raw.trim();
            let parsed = Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed));
            match parsed.ok().and_then(|value| acc.total.checked_add(value)) {
                Some(total) => acc.total = total,
                None => acc.malformed += 1,
            }
            acc
        })
}

/// Canonical wire form: no trailing zeros, no exponent.
pub fn format_amount(value: Decimal) -> String {
    value.normalize().to_string()
}
