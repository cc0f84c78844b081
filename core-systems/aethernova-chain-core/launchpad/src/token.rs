//! Launched value token: fixed supply, balances and allowances.
//!
//! The factory owns every token it creates and holds the whole supply at birth.
//! Supply is never minted or burned afterwards, so `sum(balances) == total_supply`
//! holds across any sequence of transfers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{Address, Balance, ADDRESS_LEN, DECIMALS};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient token balance: have {available}, need {requested}")]
    InsufficientBalance { available: Balance, requested: Balance },
    #[error("insufficient allowance: have {available}, need {requested}")]
    InsufficientAllowance { available: Balance, requested: Balance },
    #[error("transfer to the zero address")]
    ZeroAddress,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueToken {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    /// Controls administrative operations; always the factory.
    pub owner: Address,
    pub creator: Address,
    pub total_supply: Balance,
    balances: BTreeMap<Address, Balance>,
    allowances: BTreeMap<Address, BTreeMap<Address, Balance>>,
}

impl ValueToken {
    /// New token with the entire supply credited to `owner`.
    pub fn new(
        address: Address,
        name: impl Into<String>,
        symbol: impl Into<String>,
        owner: Address,
        creator: Address,
        total_supply: Balance,
    ) -> Self {
        let mut balances = BTreeMap::new();
        if total_supply > 0 {
            balances.insert(owner, total_supply);
        }
        Self {
            address,
            name: name.into(),
            symbol: symbol.into(),
            decimals: DECIMALS,
            owner,
            creator,
            total_supply,
            balances,
            allowances: BTreeMap::new(),
        }
    }

    /// Deterministic token address: last 20 bytes of sha256(factory || index).
    pub fn derive_address(factory: Address, index: u64) -> Address {
        let mut hasher = Sha256::new();
        hasher.update(factory.as_bytes());
        hasher.update(index.to_be_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; ADDRESS_LEN];
        out.copy_from_slice(&digest[digest.len() - ADDRESS_LEN..]);
        Address(out)
    }

    pub fn balance_of(&self, holder: Address) -> Balance {
        self.balances.get(&holder).copied().unwrap_or(0)
    }

    pub fn allowance(&self, holder: Address, spender: Address) -> Balance {
        self.allowances
            .get(&holder)
            .and_then(|m| m.get(&spender))
            .copied()
            .unwrap_or(0)
    }

    /// Holders with a non-zero balance, ascending by address.
    pub fn holders(&self) -> impl Iterator<Item = (&Address, &Balance)> {
        self.balances.iter()
    }

    pub fn transfer(&mut self, from: Address, to: Address, amount: Balance) -> Result<(), TokenError> {
        if to.is_zero() {
            return Err(TokenError::ZeroAddress);
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(TokenError::InsufficientBalance { available, requested: amount });
        }
        if amount == 0 || from == to {
            return Ok(());
        }
        self.set_balance(from, available - amount);
        // `to` cannot overflow: every balance is bounded by total_supply.
        let credited = self.balance_of(to) + amount;
        self.set_balance(to, credited);
        Ok(())
    }

    pub fn approve(&mut self, holder: Address, spender: Address, amount: Balance) {
        if amount == 0 {
            if let Some(m) = self.allowances.get_mut(&holder) {
                m.remove(&spender);
                if m.is_empty() {
                    self.allowances.remove(&holder);
                }
            }
        } else {
            self.allowances.entry(holder).or_default().insert(spender, amount);
        }
    }

    /// Spend `spender`'s allowance over `from` and move the tokens.
    pub fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> Result<(), TokenError> {
        let allowed = self.allowance(from, spender);
        if allowed < amount {
            return Err(TokenError::InsufficientAllowance { available: allowed, requested: amount });
        }
        self.transfer(from, to, amount)?;
        self.approve(from, spender, allowed - amount);
        Ok(())
    }

    fn set_balance(&mut self, holder: Address, amount: Balance) {
        if amount == 0 {
            self.balances.remove(&holder);
        } else {
            self.balances.insert(holder, amount);
        }
    }
}
