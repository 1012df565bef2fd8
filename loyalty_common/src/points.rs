use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

//--------------------------------------       Points        ---------------------------------------------------------
/// A signed quantity of loyalty points. Ledger deltas, balances and caps are all expressed in `Points`.
#[derive(Debug, Clone, Copy, Default, Type, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Points(i64);

op!(binary Points, Add, add);
op!(binary Points, Sub, sub);
op!(inplace Points, AddAssign, add_assign);
op!(inplace Points, SubAssign, sub_assign);
op!(unary Points, Neg, neg);

impl Mul<i64> for Points {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Points {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a Points> for Points {
    fn sum<I: Iterator<Item = &'a Points>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, p| acc + *p)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value cannot be represented as points: {0}")]
pub struct PointsConversionError(String);

impl From<i64> for Points {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl TryFrom<f64> for Points {
    type Error = PointsConversionError;

    /// Converts an already-rounded floating point value. Fractions are truncated.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value > i64::MAX as f64 || value < i64::MIN as f64 {
            Err(PointsConversionError(format!("{value} is out of range")))
        } else {
            #[allow(clippy::cast_possible_truncation)]
            Ok(Self(value as i64))
        }
    }
}

impl Display for Points {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} pts", self.0)
    }
}

impl Points {
    pub const fn zero() -> Self {
        Self(0)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }

    /// Clamps the value at zero from below.
    pub fn non_negative(self) -> Self {
        Self(self.0.max(0))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn arithmetic() {
        let mut p = Points::from(100);
        p += Points::from(25);
        p -= Points::from(5);
        assert_eq!(p, Points::from(120));
        assert_eq!(-p, Points::from(-120));
        assert_eq!(p * 2, Points::from(240));
        assert_eq!((Points::from(3) - Points::from(10)).non_negative(), Points::zero());
    }

    #[test]
    fn sum_of_deltas() {
        let deltas = [Points::from(50), Points::from(-20), Points::from(5)];
        let total: Points = deltas.iter().sum();
        assert_eq!(total.value(), 35);
        assert_eq!(total.to_string(), "35 pts");
    }

    #[test]
    fn from_float() {
        assert_eq!(Points::try_from(12.0).unwrap(), Points::from(12));
        assert!(Points::try_from(f64::NAN).is_err());
        assert_eq!(serde_json::to_string(&Points::from(7)).unwrap(), "7");
    }
}
