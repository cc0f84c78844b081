//! Aethernova Launchpad — bonding-curve token launch engine
//! Features:
//! - Factory lifecycle: create token (flat platform fee) -> buy along curve -> close on target -> deposit
//! - One fungible token per launch, whole supply minted to the factory and sold from its holding
//! - Staircase price curve over units sold, checked u128 fixed-point math (18 decimals)
//! - Platform fees tracked apart from sale proceeds; only the owner withdraws fees
//! - Concurrency: single parking_lot Mutex per factory, every operation serialized
//! - Events: tokio::broadcast
//! - Persistence: async KV storage (memory / filesystem) with bincode-typed facade
//!
//! Notes:
//! - Native value moves through the `NativeLedger` trait; plug your chain's bank there.
//! - Deposited proceeds go wherever the `LiquiditySink` points (creator by default).
//!
//! (c) Aethernova

#![forbid(unsafe_code)]
#![allow(clippy::too_many_arguments)]

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub mod config;
pub mod curve;
pub mod factory;
pub mod fees;
pub mod ledger;
pub mod sale;
pub mod storage;
pub mod telemetry;
pub mod token;
pub mod units;

pub use curve::{CurveError, PricingCurve};
pub use factory::{
    Factory, FactoryConfig, FactoryError, FactoryEvent, FactoryState, Purchase, Settlement, TokenInfo,
};
pub use fees::{FeeError, FeeLedger};
pub use ledger::{
    CreatorSink, FixedSink, LedgerError, LedgerSnapshot, LiquiditySink, MemoryLedger, NativeLedger,
};
pub use sale::{ClosingRule, SaleRecord, SaleRegistry, SaleStatus};
pub use token::{TokenError, ValueToken};

// ---------- Primitives ----------

/// Smallest unit amount (native value or token units).
pub type Balance = u128;

/// Fixed decimal precision of native value and launched tokens.
pub const DECIMALS: u32 = 18;

/// One whole native unit / one whole token, in smallest units.
pub const ONE: Balance = 1_000_000_000_000_000_000;

pub const ADDRESS_LEN: usize = 20;

/// 20-byte account or token identity.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Address with `x` big-endian in its low 8 bytes. Handy for fixtures and dev accounts.
    pub fn from_low_u64(x: u64) -> Self {
        let mut a = [0u8; ADDRESS_LEN];
        a[ADDRESS_LEN - 8..].copy_from_slice(&x.to_be_bytes());
        Address(a)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid hex: {0}")]
    Hex(String),
    #[error("expected {ADDRESS_LEN} bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AddressError::Hex(e.to_string()))?;
        let arr: [u8; ADDRESS_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::Length(bytes.len()))?;
        Ok(Address(arr))
    }
}

// Hex strings on the wire keep JSON output readable and let addresses key maps.
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------- Math helpers ----------

/// Compute ceil((a * b) / d) with checked u128 arithmetic; None on overflow or d == 0.
pub(crate) fn mul_div_ceil_u128(a: u128, b: u128, d: u128) -> Option<u128> {
    if d == 0 {
        return None;
    }
    let n = a.checked_mul(b)?;
    let q = n / d;
    if n % d == 0 {
        Some(q)
    } else {
        q.checked_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip() {
        let a = Address::from_low_u64(0xfe);
        let s = a.to_string();
        assert_eq!(s, "0x00000000000000000000000000000000000000fe");
        assert_eq!(s.parse::<Address>().unwrap(), a);
        assert_eq!("00000000000000000000000000000000000000fe".parse::<Address>().unwrap(), a);
    }

    #[test]
    fn address_rejects_bad_input() {
        assert!(matches!("0x1234".parse::<Address>(), Err(AddressError::Length(2))));
        assert!(matches!("0xzz".parse::<Address>(), Err(AddressError::Hex(_))));
    }

    #[test]
    fn address_serializes_as_string() {
        let a = Address::from_low_u64(7);
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, "\"0x0000000000000000000000000000000000000007\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn mul_div_rounding() {
        assert_eq!(mul_div_ceil_u128(7, 3, 2), Some(11));
        assert_eq!(mul_div_ceil_u128(4, 3, 2), Some(6));
        assert_eq!(mul_div_ceil_u128(1, 1, 0), None);
        assert_eq!(mul_div_ceil_u128(u128::MAX, 2, 1), None);
    }
}
