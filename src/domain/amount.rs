//! Amount validation for the internal currency.

use std::str::FromStr;

use rust_decimal::Decimal;

use super::error::EscrowError;

/// Accept only strictly positive amounts.
///
/// `Decimal` has no NaN or infinity, so positivity is the whole check
/// once a value exists.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, EscrowError> {
    if amount <= Decimal::ZERO {
        return Err(EscrowError::InvalidAmount(amount.to_string()));
    }
    Ok(amount.normalize())
}

/// Parse and validate an amount typed by a human (`"35"`, `"12.50"`).
pub fn parse_amount(raw: &str) -> Result<Decimal, EscrowError> {
    let trimmed = raw.trim();
    let amount = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| EscrowError::InvalidAmount(trimmed.to_string()))?;
    validate_amount(amount)
}
