//! Platform fee accounting.
//!
//! Fees are booked on every launch and paid out only through the owner's
//! withdraw. Sale proceeds never pass through here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Balance;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("insufficient fee balance: available {available}, requested {requested}")]
    Insufficient { available: Balance, requested: Balance },
    #[error("fee accounting overflow")]
    Overflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLedger {
    platform_fee: Balance,
    collected: Balance,
    withdrawn: Balance,
}

impl FeeLedger {
    pub fn new(platform_fee: Balance) -> Self {
        Self { platform_fee, collected: 0, withdrawn: 0 }
    }

    pub fn platform_fee(&self) -> Balance {
        self.platform_fee
    }

    pub fn collected(&self) -> Balance {
        self.collected
    }

    pub fn withdrawn(&self) -> Balance {
        self.withdrawn
    }

    /// Fees received and not yet withdrawn.
    pub fn available(&self) -> Balance {
        self.collected - self.withdrawn
    }

    pub(crate) fn ensure_collectable(&self) -> Result<(), FeeError> {
        self.collected.checked_add(self.platform_fee).ok_or(FeeError::Overflow)?;
        Ok(())
    }

    pub(crate) fn ensure_withdrawable(&self, amount: Balance) -> Result<(), FeeError> {
        let available = self.available();
        if amount > available {
            return Err(FeeError::Insufficient { available, requested: amount });
        }
        Ok(())
    }

    /// Book one launch fee.
    pub(crate) fn collect(&mut self) -> Result<(), FeeError> {
        self.collected = self
            .collected
            .checked_add(self.platform_fee)
            .ok_or(FeeError::Overflow)?;
        Ok(())
    }

    pub(crate) fn record_withdrawal(&mut self, amount: Balance) -> Result<(), FeeError> {
        self.ensure_withdrawable(amount)?;
        self.withdrawn += amount;
        Ok(())
    }
}
