//! Conversion between display amounts and on-chain smallest units.

use alloy_primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::{OrchestratorError, Result};

/// Scale a positive display amount by `10^decimals`, rounding half away from zero.
pub fn to_smallest_unit(amount: Decimal, decimals: u8) -> Result<U256> {
    if amount <= Decimal::ZERO {
        return Err(OrchestratorError::InvalidAmount(format!(
            "{amount} must be greater than zero"
        )));
    }

    let mut scaled = amount;
    for _ in 0..decimals {
        scaled = scaled
            .checked_mul(Decimal::TEN)
            .ok_or_else(|| OrchestratorError::InvalidAmount(format!("{amount} is too large")))?;
    }

    let units = scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u128()
        .ok_or_else(|| OrchestratorError::InvalidAmount(format!("{amount} is out of range")))?;

    if units == 0 {
        return Err(OrchestratorError::InvalidAmount(format!(
            "{amount} is below the token's precision"
        )));
    }
    Ok(U256::from(units))
}

/// Inverse of [`to_smallest_unit`] for values that fit a `Decimal`.
pub fn from_smallest_unit(units: U256, decimals: u8) -> Option<Decimal> {
    let raw: i128 = u128::try_from(units).ok()?.try_into().ok()?;
    Decimal::try_from_i128_with_scale(raw, u32::from(decimals)).ok()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn scales_by_decimals() {
        assert_eq!(to_smallest_unit(dec("100"), 2).unwrap(), U256::from(10_000u64));
        assert_eq!(to_smallest_unit(dec("1.5"), 6).unwrap(), U256::from(1_500_000u64));
        assert_eq!(to_smallest_unit(dec("50"), 0).unwrap(), U256::from(50u64));
    }

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(to_smallest_unit(dec("0.125"), 2).unwrap(), U256::from(13u64));
        assert_eq!(to_smallest_unit(dec("0.124"), 2).unwrap(), U256::from(12u64));
    }

    #[test]
    fn rejects_non_positive_and_dust() {
        assert!(matches!(
            to_smallest_unit(Decimal::ZERO, 2),
            Err(OrchestratorError::InvalidAmount(_))
        ));
        assert!(matches!(
            to_smallest_unit(dec("-3"), 2),
            Err(OrchestratorError::InvalidAmount(_))
        ));
        assert!(matches!(
            to_smallest_unit(dec("0.001"), 2),
            Err(OrchestratorError::InvalidAmount(_))
        ));
    }

    #[test]
    fn converts_back_for_display() {
        assert_eq!(from_smallest_unit(U256::from(12_345u64), 2), Some(dec("123.45")));
        assert_eq!(from_smallest_unit(U256::MAX, 2), None);
    }
}
