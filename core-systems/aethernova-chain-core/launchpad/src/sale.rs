//! Sale records and the registry that owns them.
//!
//! Records live in an append-only arena indexed by creation order; a side map
//! resolves token address -> index. Nothing is ever removed, so an index handed
//! out once stays valid for the life of the factory.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Address, Balance, ONE};

/// Sale status. Open -> Closed -> Settled, never backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleStatus {
    Open,
    Closed,
    Settled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleRecord {
    pub token: Address,
    pub creator: Address,
    /// Token units sold so far.
    pub sold: Balance,
    /// Native value collected from buyers.
    pub raised: Balance,
    pub status: SaleStatus,
    pub created_at: u64,
    pub closed_at: Option<u64>,
    pub settled_at: Option<u64>,
}

impl SaleRecord {
    fn new(token: Address, creator: Address, now: u64) -> Self {
        Self {
            token,
            creator,
            sold: 0,
            raised: 0,
            status: SaleStatus::Open,
            created_at: now,
            closed_at: None,
            settled_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SaleStatus::Open
    }
}

/// When a sale stops accepting buys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosingRule {
    /// Close once `raised >= target_raised`.
    pub target_raised: Balance,
    /// Close once `sold >= token_limit`.
    pub token_limit: Balance,
}

impl Default for ClosingRule {
    fn default() -> Self {
        Self {
            target_raised: 3 * ONE,
            token_limit: 500_000 * ONE,
        }
    }
}

impl ClosingRule {
    pub fn reached(&self, sold: Balance, raised: Balance) -> bool {
        raised >= self.target_raised || sold >= self.token_limit
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SaleRegistry {
    records: Vec<SaleRecord>,
    by_token: HashMap<Address, usize>,
}

impl SaleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from records in creation order.
    pub(crate) fn from_records(records: Vec<SaleRecord>) -> Self {
        let by_token = records.iter().enumerate().map(|(i, r)| (r.token, i)).collect();
        Self { records, by_token }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SaleRecord> {
        self.records.iter()
    }

    pub fn contains(&self, token: &Address) -> bool {
        self.by_token.contains_key(token)
    }

    /// Append an open record; returns its index.
    pub fn open(&mut self, token: Address, creator: Address, now: u64) -> usize {
        let idx = self.records.len();
        self.records.push(SaleRecord::new(token, creator, now));
        self.by_token.insert(token, idx);
        idx
    }

    pub fn get(&self, index: usize) -> Option<&SaleRecord> {
        self.records.get(index)
    }

    pub fn index_of(&self, token: &Address) -> Option<usize> {
        self.by_token.get(token).copied()
    }

    pub fn by_token(&self, token: &Address) -> Option<&SaleRecord> {
        self.index_of(token).and_then(|i| self.records.get(i))
    }

    /// Book a purchase on an open record and close it if the rule is met.
    /// Returns true when this purchase closed the sale. Callers check openness
    /// and overflow beforehand; a closed or missing record is left untouched.
    pub(crate) fn record_purchase(
        &mut self,
        index: usize,
        amount: Balance,
        paid: Balance,
        rule: &ClosingRule,
        now: u64,
    ) -> bool {
        let Some(r) = self.records.get_mut(index) else {
            return false;
        };
        if !r.is_open() {
            return false;
        }
        r.sold = r.sold.saturating_add(amount);
        r.raised = r.raised.saturating_add(paid);
        if rule.reached(r.sold, r.raised) {
            r.status = SaleStatus::Closed;
            r.closed_at = Some(now);
            return true;
        }
        false
    }

    pub(crate) fn mark_settled(&mut self, index: usize, now: u64) {
        if let Some(r) = self.records.get_mut(index) {
            if r.status == SaleStatus::Closed {
                r.status = SaleStatus::Settled;
                r.settled_at = Some(now);
            }
        }
    }

    /// Native value held for sales that have not been deposited yet.
    pub fn undeposited(&self) -> Balance {
        self.records
            .iter()
            .filter(|r| r.status != SaleStatus::Settled)
            .fold(0u128, |acc, r| acc.saturating_add(r.raised))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(x: u8) -> Address {
        Address::from_low_u64(x as u64)
    }

    #[test]
    fn open_and_lookup() {
        let mut reg = SaleRegistry::new();
        let i0 = reg.open(addr(0xA0), addr(0x01), 100);
        let i1 = reg.open(addr(0xA1), addr(0x02), 101);
        assert_eq!((i0, i1), (0, 1));
        assert_eq!(reg.len(), 2);

        let r = reg.by_token(&addr(0xA1)).unwrap();
        assert_eq!(r.creator, addr(0x02));
        assert_eq!(r.sold, 0);
        assert_eq!(r.raised, 0);
        assert!(r.is_open());
        assert_eq!(reg.get(0).unwrap().token, addr(0xA0));
        assert!(reg.get(2).is_none());
        assert!(reg.by_token(&addr(0xFF)).is_none());
    }

    #[test]
    fn closes_on_target_and_freezes() {
        let rule = ClosingRule::default();
        let mut reg = SaleRegistry::new();
        let i = reg.open(addr(0xA0), addr(0x01), 0);

        assert!(!reg.record_purchase(i, 10_000 * ONE, ONE, &rule, 1));
        assert!(reg.record_purchase(i, 10_000 * ONE, 2 * ONE, &rule, 2));
        let r = reg.get(i).unwrap().clone();
        assert_eq!(r.status, SaleStatus::Closed);
        assert_eq!(r.closed_at, Some(2));

        // frozen
        assert!(!reg.record_purchase(i, ONE, ONE, &rule, 3));
        assert_eq!(reg.get(i).unwrap(), &r);
    }

    #[test]
    fn closes_on_token_limit() {
        let rule = ClosingRule { target_raised: 1_000 * ONE, token_limit: 20_000 * ONE };
        let mut reg = SaleRegistry::new();
        let i = reg.open(addr(0xA0), addr(0x01), 0);
        assert!(!reg.record_purchase(i, 10_000 * ONE, ONE, &rule, 1));
        assert!(reg.record_purchase(i, 10_000 * ONE, 2 * ONE, &rule, 1));
    }

    #[test]
    fn settle_only_from_closed() {
        let rule = ClosingRule::default();
        let mut reg = SaleRegistry::new();
        let i = reg.open(addr(0xA0), addr(0x01), 0);
        reg.mark_settled(i, 5);
        assert_eq!(reg.get(i).unwrap().status, SaleStatus::Open);

        reg.record_purchase(i, ONE, 3 * ONE, &rule, 6);
        assert_eq!(reg.undeposited(), 3 * ONE);
        reg.mark_settled(i, 7);
        let r = reg.get(i).unwrap();
        assert_eq!(r.status, SaleStatus::Settled);
        assert_eq!(r.settled_at, Some(7));
        assert_eq!(reg.undeposited(), 0);
    }
}
