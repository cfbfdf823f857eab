use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// Configured bounds for a single credit or debit amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountLimits {
    pub min: Decimal,
    pub max: Decimal,
}

impl Default for AmountLimits {
    fn default() -> Self {
        Self {
            min: Decimal::new(1, 2),           // 0.01
            max: Decimal::new(99_999_999, 2),  // 999,999.99
        }
    }
}

/// A validated, strictly positive monetary amount held at scale 2.
///
/// Every amount entering the engine passes through this type, so all
/// downstream arithmetic is exact fixed-point with no float drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Money(Decimal);

impl Money {
    pub fn parse(raw: &str, limits: &AmountLimits) -> Result<Self, MoneyError> {
        let value = Decimal::from_str(raw.trim())
            .map_err(|_| MoneyError::InvalidAmount("not a number".to_string()))?;
        Self::from_decimal(value, limits)
    }

    pub fn from_decimal(value: Decimal, limits: &AmountLimits) -> Result<Self, MoneyError> {
        if value <= Decimal::ZERO {
            return Err(MoneyError::InvalidAmount("must be greater than zero".to_string()));
        }
        if value.normalize().scale() > 2 {
            return Err(MoneyError::InvalidAmount(
                "more than 2 decimal places".to_string(),
            ));
        }
        if value < limits.min {
            return Err(MoneyError::InvalidAmount(format!(
                "below the minimum of {}",
                limits.min
            )));
        }
        if value > limits.max {
            return Err(MoneyError::InvalidAmount(format!(
                "above the maximum of {}",
                limits.max
            )));
        }
        let mut value = value;
        value.rescale(2);
        Ok(Self(value))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}
