use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

pub const USDC_DECIMALS: u32 = 6;
pub const USDC_BASE_UNIT: u64 = 1_000_000; // 10^6

/// A USDC amount in base units (micro-USDC). Amounts are unsigned by
/// construction; a balance can never be driven negative.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UsdcAmount(u64);

impl UsdcAmount {
    pub const ZERO: Self = Self(0);

    pub fn from_usdc(usdc: f64) -> Self {
        Self((usdc * USDC_BASE_UNIT as f64).round() as u64)
    }

    pub fn from_base_units(units: u64) -> Self {
        Self(units)
    }

    pub fn to_usdc(&self) -> f64 {
        self.0 as f64 / USDC_BASE_UNIT as f64
    }

    pub fn to_base_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Integer percentage of this amount, rounding down in base units.
    /// `percent` is expressed in whole percent (20 = 20%).
    pub fn percentage(&self, percent: u64) -> Self {
        Self(self.0 / 100 * percent + self.0 % 100 * percent / 100)
    }

    /// Proportional share `self * numerator / denominator`, computed in
    /// u128 to avoid overflow, rounding down. Returns ZERO when the
    /// denominator is zero.
    pub fn mul_div(&self, numerator: u64, denominator: u64) -> Self {
        if denominator == 0 {
            return Self::ZERO;
        }
        Self((self.0 as u128 * numerator as u128 / denominator as u128) as u64)
    }

    pub fn min(self, other: Self) -> Self {
        Self(self.0.min(other.0))
    }
}

impl Sum for UsdcAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc.saturating_add(x))
    }
}

impl fmt::Display for UsdcAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6} USDC", self.to_usdc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        let amount = UsdcAmount::from_usdc(100.0);
        assert_eq!(amount.to_base_units(), 100_000_000);
        assert_eq!(amount.to_usdc(), 100.0);

        let cents = UsdcAmount::from_usdc(0.25);
        assert_eq!(cents.to_base_units(), 250_000);
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = UsdcAmount::from_usdc(10.0);
        let b = UsdcAmount::from_usdc(3.0);

        assert_eq!(a.checked_add(b), Some(UsdcAmount::from_usdc(13.0)));
        assert_eq!(a.checked_sub(b), Some(UsdcAmount::from_usdc(7.0)));
        assert_eq!(b.checked_sub(a), None);

        let max = UsdcAmount::from_base_units(u64::MAX);
        assert_eq!(max.checked_add(UsdcAmount::from_base_units(1)), None);
    }

    #[test]
    fn test_percentage_rounds_down() {
        // 20% of $40 = $8 exactly
        let payout = UsdcAmount::from_usdc(40.0);
        assert_eq!(payout.percentage(20), UsdcAmount::from_usdc(8.0));

        // 5% of $100 = $5
        let principal = UsdcAmount::from_usdc(100.0);
        assert_eq!(principal.percentage(5), UsdcAmount::from_usdc(5.0));

        // Rounds down on indivisible base units
        let odd = UsdcAmount::from_base_units(33);
        assert_eq!(odd.percentage(50), UsdcAmount::from_base_units(16));
    }

    #[test]
    fn test_mul_div() {
        // $120 over 4 hours, 3 hours elapsed -> $90
        let total = UsdcAmount::from_usdc(120.0);
        assert_eq!(total.mul_div(3 * 3600, 4 * 3600), UsdcAmount::from_usdc(90.0));

        assert_eq!(total.mul_div(1, 0), UsdcAmount::ZERO);
    }
}
