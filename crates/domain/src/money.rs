//! Decimal money amounts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// A monetary amount in the store currency.
///
/// Backed by a decimal so sums of prices are exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Creates an amount from whole currency units.
    pub fn from_major(units: i64) -> Self {
        Self(Decimal::from(units))
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// `true` below zero.
    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Multiplies by a quantity.
    pub fn times(&self, quantity: i32) -> Money {
        Money(self.0 * Decimal::from(quantity))
    }

    /// Returns the amount in minor units (hundredths), as gateways expect.
    ///
    /// Fails if the amount does not fit in an `i64` once scaled.
    pub fn to_minor_units(&self) -> Result<i64, DomainError> {
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)
            .map(|minor| minor.round())
            .and_then(|minor| i64::try_from(minor).ok())
            .ok_or_else(|| DomainError::Validation(format!("amount {self} is out of range")))
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Self {
        money.0
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}
