//! Settlement seam: native value ledger and liquidity sink.
//!
//! All monetary side-effects of the factory go through `NativeLedger`.
//! A transfer either fully succeeds or returns an error with nothing moved.

use std::{
    collections::BTreeMap,
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{sale::SaleRecord, Address, Balance};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient native balance: have {available}, need {requested}")]
    Insufficient { available: Balance, requested: Balance },
    #[error("balance overflow")]
    Overflow,
    #[error("ledger failure: {0}")]
    Other(String),
}

/// Native value ledger the factory settles against.
pub trait NativeLedger: Send + Sync + 'static {
    /// Current UNIX time (seconds).
    fn now_unix(&self) -> u64;

    /// The factory's own account: fees and sale proceeds accumulate here.
    fn factory_account(&self) -> Address;

    fn balance_of(&self, who: Address) -> Balance;

    /// Move `amount` from `from` to `to`, all-or-nothing.
    fn transfer(&self, from: Address, to: Address, amount: Balance) -> Result<(), LedgerError>;
}

/// Where a closed sale's proceeds and unsold inventory go on deposit.
pub trait LiquiditySink: Send + Sync + 'static {
    fn destination(&self, sale: &SaleRecord) -> Address;
}

/// Pays everything back to the sale's creator.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreatorSink;

impl LiquiditySink for CreatorSink {
    fn destination(&self, sale: &SaleRecord) -> Address {
        sale.creator
    }
}

/// Forwards everything to one fixed account (e.g. a pool router).
#[derive(Clone, Copy, Debug)]
pub struct FixedSink(pub Address);

impl LiquiditySink for FixedSink {
    fn destination(&self, _sale: &SaleRecord) -> Address {
        self.0
    }
}

// ---------- In-memory ledger ----------

/// Serializable view of a `MemoryLedger`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub factory: Address,
    pub balances: BTreeMap<Address, Balance>,
}

/// Process-local ledger. Used by the CLI and as a dev backend.
#[derive(Debug)]
pub struct MemoryLedger {
    factory: Address,
    balances: RwLock<BTreeMap<Address, Balance>>,
}

impl MemoryLedger {
    pub fn new(factory: Address) -> Self {
        Self { factory, balances: RwLock::new(BTreeMap::new()) }
    }

    pub fn from_snapshot(s: LedgerSnapshot) -> Self {
        Self { factory: s.factory, balances: RwLock::new(s.balances) }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot { factory: self.factory, balances: self.balances.read().clone() }
    }

    /// Credit `to` out of thin air (dev faucet).
    pub fn mint(&self, to: Address, amount: Balance) -> Result<(), LedgerError> {
        let mut m = self.balances.write();
        let b = m.entry(to).or_default();
        *b = b.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Sum of all balances.
    pub fn total(&self) -> Balance {
        self.balances.read().values().fold(0u128, |a, b| a.saturating_add(*b))
    }
}

impl NativeLedger for MemoryLedger {
    fn now_unix(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }

    fn factory_account(&self) -> Address {
        self.factory
    }

    fn balance_of(&self, who: Address) -> Balance {
        self.balances.read().get(&who).copied().unwrap_or(0)
    }

    fn transfer(&self, from: Address, to: Address, amount: Balance) -> Result<(), LedgerError> {
        let mut m = self.balances.write();
        let available = m.get(&from).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::Insufficient { available, requested: amount });
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        let credited = m
            .get(&to)
            .copied()
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        m.insert(from, available - amount);
        m.insert(to, credited);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sale::SaleStatus;

    fn addr(x: u8) -> Address {
        Address::from_low_u64(x as u64)
    }

    #[test]
    fn transfer_is_all_or_nothing() {
        let l = MemoryLedger::new(addr(0xFE));
        l.mint(addr(1), 100).unwrap();
        l.transfer(addr(1), addr(2), 60).unwrap();
        assert_eq!(l.balance_of(addr(1)), 40);
        assert_eq!(l.balance_of(addr(2)), 60);

        let err = l.transfer(addr(1), addr(2), 41).unwrap_err();
        assert_eq!(err, LedgerError::Insufficient { available: 40, requested: 41 });
        assert_eq!(l.balance_of(addr(1)), 40);
        assert_eq!(l.total(), 100);
    }

    #[test]
    fn overflow_rejected_without_debit() {
        let l = MemoryLedger::new(addr(0xFE));
        l.mint(addr(1), 10).unwrap();
        l.mint(addr(2), u128::MAX).unwrap();
        assert_eq!(l.transfer(addr(1), addr(2), 1), Err(LedgerError::Overflow));
        assert_eq!(l.balance_of(addr(1)), 10);
    }

    #[test]
    fn snapshot_roundtrip() {
        let l = MemoryLedger::new(addr(0xFE));
        l.mint(addr(3), 7).unwrap();
        let l2 = MemoryLedger::from_snapshot(l.snapshot());
        assert_eq!(l2.factory_account(), addr(0xFE));
        assert_eq!(l2.balance_of(addr(3)), 7);
    }

    #[test]
    fn sinks_pick_destination() {
        let sale = SaleRecord {
            token: addr(0xA0),
            creator: addr(0x02),
            sold: 0,
            raised: 0,
            status: SaleStatus::Closed,
            created_at: 0,
            closed_at: Some(1),
            settled_at: None,
        };
        assert_eq!(CreatorSink.destination(&sale), addr(0x02));
        assert_eq!(FixedSink(addr(0x77)).destination(&sale), addr(0x77));
    }
}
