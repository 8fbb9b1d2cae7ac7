//! Fixed-point money amounts.
//!
//! All balances, stakes and fees are held as integer cents. Decimal values only
//! appear at the edges (parsing, display, commission rates) and are converted with
//! a single round-half-up step at the point of computation.

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};
use thiserror::Error;

/// Number of fractional digits carried by [`Money`].
pub const MONEY_SCALE: u32 = 2;

/// Errors produced when converting into [`Money`] or [`CommissionRate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Amount has more than {MONEY_SCALE} decimal places: {0}")]
    TooPrecise(Decimal),

    #[error("Amount out of range: {0}")]
    OutOfRange(Decimal),

    #[error("Invalid amount: {0}")]
    Parse(String),

    #[error("Commission rate must be in [0, 1): {0}")]
    InvalidRate(Decimal),
}

/// An amount of money in minor units (cents).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Whole currency units, e.g. `Money::from_units(100)` is $100.00.
    pub const fn from_units(units: i64) -> Self {
        Self(units * 100)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Convert an exact decimal amount. Sub-cent precision is rejected rather than rounded.
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        let normalized = value.normalize();
        if normalized.scale() > MONEY_SCALE {
            return Err(MoneyError::TooPrecise(value));
        }
        (normalized * Decimal::ONE_HUNDRED)
            .to_i64()
            .map(Self)
            .ok_or(MoneyError::OutOfRange(value))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, MONEY_SCALE)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn checked_mul(self, factor: i64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }

    /// `round_half_up(self * rate)` to cents.
    ///
    /// 33.33 at 5% is 1.6665 and yields 1.67.
    pub fn apply_rate(self, rate: CommissionRate) -> Money {
        let raw = self.to_decimal() * rate.as_decimal();
        let rounded = raw.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
        // |rate| < 1 so the product never exceeds self in magnitude.
        Money((rounded * Decimal::ONE_HUNDRED).to_i64().unwrap_or(0))
    }
}

// The operators below are plain `i64` arithmetic. They only combine single stakes, fees
// and caps, each bounded by `LedgerConfig::max_transaction` or `BettingConfig::max_bet`
// (far below `i64::MAX / 4`). Stored balances, lifetime totals and daily-cap sums go
// through `checked_add` / `checked_sub`.
impl Add for Money {
    type Output = Money;

    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        Money(iter.map(|m| m.0).sum())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Money {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| MoneyError::Parse(s.to_string()))?;
        Self::from_decimal(value)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Serialize::serialize(&self.to_decimal(), serializer)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Money::from_decimal(value).map_err(serde::de::Error::custom)
    }
}

/// Fraction of a stake taken by the platform on a decisive outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct CommissionRate(Decimal);

impl CommissionRate {
    pub fn new(rate: Decimal) -> Result<Self, MoneyError> {
        if rate.is_sign_negative() || rate >= Decimal::ONE {
            return Err(MoneyError::InvalidRate(rate));
        }
        Ok(Self(rate))
    }

    pub fn as_decimal(self) -> Decimal {
        self.0
    }
}

impl Default for CommissionRate {
    fn default() -> Self {
        Self(Decimal::new(5, 2))
    }
}

impl TryFrom<Decimal> for CommissionRate {
    type Error = MoneyError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CommissionRate> for Decimal {
    fn from(rate: CommissionRate) -> Self {
        rate.0
    }
}

impl FromStr for CommissionRate {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|_| MoneyError::Parse(s.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
