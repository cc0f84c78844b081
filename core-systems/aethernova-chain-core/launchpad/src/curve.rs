//! Staircase bonding curve.
//!
//! Formula: price(sold) = floor + step * (sold / increment)
//! - `floor`     = price of the first step (native units per whole token)
//! - `step`      = price added every time another `increment` tokens are sold
//! - `increment` = width of one step, in token units
//! - `sold`      = tokens sold so far, in token units
//!
//! With the defaults (0.0001, 0.0001, 10_000 tokens) the first 10k tokens cost 0.0001
//! each and the price reads 0.0002 once 10k are gone. Integer math only, so the same
//! input always produces the same output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{mul_div_ceil_u128, Balance, ONE};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CurveError {
    #[error("invalid curve: {0}")]
    Invalid(&'static str),
    #[error("arithmetic overflow")]
    Overflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingCurve {
    pub floor: Balance,
    pub step: Balance,
    pub increment: Balance,
}

impl Default for PricingCurve {
    fn default() -> Self {
        Self {
            floor: ONE / 10_000,
            step: ONE / 10_000,
            increment: 10_000 * ONE,
        }
    }
}

impl PricingCurve {
    pub fn new(floor: Balance, step: Balance, increment: Balance) -> Result<Self, CurveError> {
        let c = Self { floor, step, increment };
        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), CurveError> {
        if self.floor == 0 {
            return Err(CurveError::Invalid("floor must be > 0"));
        }
        if self.increment == 0 {
            return Err(CurveError::Invalid("increment must be > 0"));
        }
        Ok(())
    }

    /// Unit price (native per whole token) once `sold` token units are gone.
    pub fn price_at(&self, sold: Balance) -> Result<Balance, CurveError> {
        if self.increment == 0 {
            return Err(CurveError::Invalid("increment must be > 0"));
        }
        let steps = sold / self.increment;
        self.step
            .checked_mul(steps)
            .and_then(|s| s.checked_add(self.floor))
            .ok_or(CurveError::Overflow)
    }

    /// Cost of buying `amount` token units when `sold` are already gone.
    /// The whole purchase is charged at the current step's price, rounded up.
    pub fn cost(&self, sold: Balance, amount: Balance) -> Result<Balance, CurveError> {
        let price = self.price_at(sold)?;
        mul_div_ceil_u128(price, amount, ONE).ok_or(CurveError::Overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_samples() {
        let c = PricingCurve::default();
        assert_eq!(c.price_at(0).unwrap(), ONE / 10_000);
        assert_eq!(c.price_at(10_000 * ONE).unwrap(), 2 * ONE / 10_000);
        // first step covers [0, 10k)
        assert_eq!(c.price_at(10_000 * ONE - 1).unwrap(), ONE / 10_000);
    }

    #[test]
    fn purchase_costs_match_launch_flow() {
        let c = PricingCurve::default();
        assert_eq!(c.cost(0, 10_000 * ONE).unwrap(), ONE);
        assert_eq!(c.cost(10_000 * ONE, 10_000 * ONE).unwrap(), 2 * ONE);
    }

    #[test]
    fn cost_rounds_up_fractional_units() {
        let c = PricingCurve::default();
        // 1 smallest token unit at 0.0001 is 10^-4 wei -> rounds up to 1
        assert_eq!(c.cost(0, 1).unwrap(), 1);
        assert_eq!(c.cost(0, 0).unwrap(), 0);
    }

    #[test]
    fn price_is_non_decreasing() {
        let c = PricingCurve::default();
        let mut prev = 0;
        let mut sold = 0;
        while sold <= 1_000_000 * ONE {
            let p = c.price_at(sold).unwrap();
            assert!(p >= prev, "price fell at sold={sold}");
            prev = p;
            sold += 3_333 * ONE;
        }
    }

    #[test]
    fn deterministic() {
        let c = PricingCurve::default();
        let a = c.price_at(123_456 * ONE).unwrap();
        let b = c.price_at(123_456 * ONE).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, 13 * ONE / 10_000);
    }

    #[test]
    fn validation_and_overflow() {
        assert!(matches!(PricingCurve::new(0, 1, 1), Err(CurveError::Invalid(_))));
        assert!(matches!(PricingCurve::new(1, 1, 0), Err(CurveError::Invalid(_))));
        let steep = PricingCurve::new(1, u128::MAX, 1).unwrap();
        assert_eq!(steep.price_at(2), Err(CurveError::Overflow));
    }
}
