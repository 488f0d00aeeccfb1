// Typed prices for catalog items
// Prices arrive from the backend either as numbers (accommodations) or as strings that may
// hold the "free" marker (events). They are resolved once, here, and never re-parsed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const FREE_MARKER: &str = "free";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriceError {
    #[error("Invalid price: {0}")]
    Invalid(String),

    #[error("Negative price: {0}")]
    Negative(Decimal),

    #[error("Price overflow: {0} x {1}")]
    Overflow(Decimal, Decimal),
}

// A monetary amount in the storefront's single display currency
// Deserialization goes through `Money::new`, so a stored amount is never negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Result<Self, PriceError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PriceError::Negative(amount));
        }
        Ok(Self(amount))
    }

    pub fn from_major(units: u32) -> Self {
        Self(Decimal::from(units))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn checked_times(&self, quantity: u32) -> Result<Money, PriceError> {
        let factor = Decimal::from(quantity);
        self.0
            .checked_mul(factor)
            .map(Money)
            .ok_or(PriceError::Overflow(self.0, factor))
    }
}

impl TryFrom<Decimal> for Money {
    type Error = PriceError;

    fn try_from(amount: Decimal) -> Result<Self, Self::Error> {
        Money::new(amount)
    }
}

impl From<Money> for Decimal {
    fn from(money: Money) -> Decimal {
        money.0
    }
}

// Saturates instead of panicking; line totals are checked when they are computed
impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.2}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "amount", rename_all = "snake_case")]
pub enum Price {
    Amount(Money),
    Free,
}

impl Price {
    // Parse a raw backend price. "free" is matched case-insensitively.
    pub fn parse(raw: &str) -> Result<Self, PriceError> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(FREE_MARKER) {
            return Ok(Price::Free);
        }

        let amount = Decimal::from_str(trimmed.trim_start_matches('$'))
            .map_err(|e| PriceError::Invalid(format!("{trimmed:?}: {e}")))?;
        Ok(Price::Amount(Money::new(amount)?))
    }

    pub fn unit_amount(&self) -> Money {
        match self {
            Price::Amount(money) => *money,
            Price::Free => Money::ZERO,
        }
    }

    pub fn total_for(&self, quantity: u32) -> Result<Money, PriceError> {
        self.unit_amount().checked_times(quantity)
    }

    pub fn is_free(&self) -> bool {
        matches!(self, Price::Free)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Amount(money) => money.fmt(f),
            Price::Free => f.write_str("Free"),
        }
    }
}
