// aethernova-chain-core/launchpad/src/factory.rs
//! Token factory: launch, bonding-curve sale, close, deposit, fee withdrawal.
//!
//! Every operation runs under one factory-wide mutex, ledger call included, so
//! operations are strictly serialized. Mutating paths validate first, then make
//! their single fallible ledger transfer, then apply in-memory updates that can
//! no longer fail: an error never leaves a half-applied operation behind.

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    curve::{CurveError, PricingCurve},
    fees::{FeeError, FeeLedger},
    ledger::{CreatorSink, LedgerError, LiquiditySink, NativeLedger},
    sale::{ClosingRule, SaleRecord, SaleRegistry, SaleStatus},
    token::{TokenError, ValueToken},
    Address, Balance, ONE,
};

// ---------- Config and state ----------

/// Immutable factory parameters, fixed at deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Administrator: the only account allowed to withdraw fees.
    pub owner: Address,
    /// Exact native value every `create` must carry.
    pub platform_fee: Balance,
    /// Supply minted per launched token.
    pub total_supply: Balance,
    /// Per-purchase bounds in token units.
    pub min_purchase: Balance,
    pub max_purchase: Balance,
    pub curve: PricingCurve,
    pub closing: ClosingRule,
}

impl FactoryConfig {
    /// Default launch parameters: 1M supply, buys of 1..=10k tokens, close at 3 native.
    pub fn new(owner: Address, platform_fee: Balance) -> Self {
        Self {
            owner,
            platform_fee,
            total_supply: 1_000_000 * ONE,
            min_purchase: ONE,
            max_purchase: 10_000 * ONE,
            curve: PricingCurve::default(),
            closing: ClosingRule::default(),
        }
    }

    pub fn validate(&self) -> Result<(), FactoryError> {
        if self.total_supply == 0 {
            return Err(FactoryError::InvalidConfig("total_supply must be > 0".into()));
        }
        if self.min_purchase == 0 {
            return Err(FactoryError::InvalidConfig("min_purchase must be > 0".into()));
        }
        if self.min_purchase > self.max_purchase {
            return Err(FactoryError::InvalidConfig("min_purchase > max_purchase".into()));
        }
        if self.max_purchase > self.total_supply {
            return Err(FactoryError::InvalidConfig("max_purchase > total_supply".into()));
        }
        if self.closing.target_raised == 0 || self.closing.token_limit == 0 {
            return Err(FactoryError::InvalidConfig("closing thresholds must be > 0".into()));
        }
        if self.closing.token_limit > self.total_supply {
            return Err(FactoryError::InvalidConfig("token_limit > total_supply".into()));
        }
        self.curve
            .validate()
            .map_err(|e| FactoryError::InvalidConfig(e.to_string()))?;
        Ok(())
    }
}

/// Everything the factory owns. Serializable for persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FactoryState {
    pub config: FactoryConfig,
    /// The factory's own ledger account; also owner of every token.
    pub address: Address,
    /// Launched tokens in creation order; index matches the sale registry.
    pub tokens: Vec<ValueToken>,
    pub sales: SaleRegistry,
    pub fees: FeeLedger,
}

impl FactoryState {
    fn new(config: FactoryConfig, address: Address) -> Self {
        let fees = FeeLedger::new(config.platform_fee);
        Self {
            config,
            address,
            tokens: Vec::new(),
            sales: SaleRegistry::new(),
            fees,
        }
    }

    fn index_of(&self, token: &Address) -> Result<usize, FactoryError> {
        self.sales
            .index_of(token)
            .filter(|i| *i < self.tokens.len())
            .ok_or(FactoryError::UnknownToken(*token))
    }
}

/// Token metadata without balances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: Address,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub owner: Address,
    pub creator: Address,
    pub total_supply: Balance,
}

impl From<&ValueToken> for TokenInfo {
    fn from(t: &ValueToken) -> Self {
        Self {
            address: t.address,
            name: t.name.clone(),
            symbol: t.symbol.clone(),
            decimals: t.decimals,
            owner: t.owner,
            creator: t.creator,
            total_supply: t.total_supply,
        }
    }
}

/// Outcome of a successful `buy`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub token: Address,
    pub amount: Balance,
    /// Curve cost of the purchase.
    pub cost: Balance,
    /// Native value actually paid (>= cost) and credited to the sale.
    pub paid: Balance,
    pub sold: Balance,
    pub raised: Balance,
    /// This purchase closed the sale.
    pub closed: bool,
}

/// Outcome of a successful `deposit`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub token: Address,
    pub destination: Address,
    pub value: Balance,
    pub tokens: Balance,
}

// ---------- Events ----------

#[derive(Clone, Debug)]
pub enum FactoryEvent {
    Created { token: Address, creator: Address, index: usize },
    Bought { token: Address, buyer: Address, amount: Balance, paid: Balance },
    SaleClosed { token: Address, sold: Balance, raised: Balance },
    Deposited { token: Address, destination: Address, value: Balance, tokens: Balance },
    FeesWithdrawn { to: Address, amount: Balance },
    Transfer { token: Address, from: Address, to: Address, amount: Balance },
    Approval { token: Address, holder: Address, spender: Address, amount: Balance },
}

// ---------- Errors ----------

#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("invalid fee: expected {expected}, got {paid}")]
    InvalidFee { expected: Balance, paid: Balance },
    #[error("insufficient payment: required {required}, got {paid}")]
    InsufficientPayment { required: Balance, paid: Balance },
    #[error("sale closed")]
    SaleClosed,
    #[error("unknown token {0}")]
    UnknownToken(Address),
    #[error("token index {0} out of range")]
    IndexOutOfRange(usize),
    #[error("caller is not the token creator")]
    NotCreator,
    #[error("sale still open")]
    SaleStillOpen,
    #[error("sale already settled")]
    AlreadySettled,
    #[error("caller is not the factory owner")]
    NotOwner,
    #[error("insufficient fee balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Balance, requested: Balance },
    #[error("amount must be > 0")]
    ZeroAmount,
    #[error("purchase amount {requested} outside [{min}, {max}]")]
    AmountOutOfRange { min: Balance, max: Balance, requested: Balance },
    #[error("factory account cannot act as a caller or a deposit destination")]
    ReservedAccount,
    #[error("invalid metadata: {0}")]
    InvalidMetadata(&'static str),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("arithmetic overflow")]
    MathOverflow,
    #[error("token: {0}")]
    Token(#[from] TokenError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<CurveError> for FactoryError {
    fn from(e: CurveError) -> Self {
        match e {
            CurveError::Overflow => FactoryError::MathOverflow,
            CurveError::Invalid(msg) => FactoryError::InvalidConfig(msg.into()),
        }
    }
}

impl From<FeeError> for FactoryError {
    fn from(e: FeeError) -> Self {
        match e {
            FeeError::Insufficient { available, requested } => {
                FactoryError::InsufficientBalance { available, requested }
            }
            FeeError::Overflow => FactoryError::MathOverflow,
        }
    }
}

// ---------- Factory core ----------

pub struct Factory<L: NativeLedger, S: LiquiditySink = CreatorSink> {
    ledger: Arc<L>,
    sink: Arc<S>,
    state: Mutex<FactoryState>,
    events_tx: broadcast::Sender<FactoryEvent>,
}

impl<L: NativeLedger, S: LiquiditySink> fmt::Debug for Factory<L, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Factory")
            .field("address", &st.address)
            .field("owner", &st.config.owner)
            .field("tokens", &st.tokens.len())
            .finish()
    }
}

impl<L: NativeLedger, S: LiquiditySink> Factory<L, S> {
    /// Deploy a fresh factory on the ledger's factory account.
    pub fn new(
        config: FactoryConfig,
        ledger: Arc<L>,
        sink: Arc<S>,
        event_capacity: usize,
    ) -> Result<Arc<Self>, FactoryError> {
        config.validate()?;
        let address = ledger.factory_account();
        info!(factory = %address, owner = %config.owner, fee = config.platform_fee, "factory deployed");
        Ok(Self::with_state(FactoryState::new(config, address), ledger, sink, event_capacity))
    }

    /// Resume from persisted state.
    pub fn restore(
        state: FactoryState,
        ledger: Arc<L>,
        sink: Arc<S>,
        event_capacity: usize,
    ) -> Result<Arc<Self>, FactoryError> {
        state.config.validate()?;
        if state.address != ledger.factory_account() {
            return Err(FactoryError::InvalidConfig(format!(
                "state belongs to factory {}, ledger serves {}",
                state.address,
                ledger.factory_account()
            )));
        }
        if state.tokens.len() != state.sales.len() {
            return Err(FactoryError::InvalidConfig("token/sale count mismatch".into()));
        }
        if state.fees.platform_fee() != state.config.platform_fee {
            return Err(FactoryError::InvalidConfig("fee ledger does not match config".into()));
        }
        debug!(factory = %state.address, tokens = state.tokens.len(), "factory restored");
        Ok(Self::with_state(state, ledger, sink, event_capacity))
    }

    fn with_state(state: FactoryState, ledger: Arc<L>, sink: Arc<S>, event_capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(event_capacity.max(1));
        Arc::new(Self {
            ledger,
            sink,
            state: Mutex::new(state),
            events_tx: tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FactoryEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, ev: FactoryEvent) {
        let _ = self.events_tx.send(ev);
    }

    fn now(&self) -> u64 {
        self.ledger.now_unix()
    }

    // ----- reads -----

    pub fn platform_fee(&self) -> Balance {
        self.state.lock().fees.platform_fee()
    }

    pub fn owner(&self) -> Address {
        self.state.lock().config.owner
    }

    pub fn address(&self) -> Address {
        self.state.lock().address
    }

    pub fn config(&self) -> FactoryConfig {
        self.state.lock().config.clone()
    }

    pub fn total_tokens(&self) -> usize {
        self.state.lock().tokens.len()
    }

    /// Token address by creation index.
    pub fn tokens(&self, index: usize) -> Result<Address, FactoryError> {
        self.state
            .lock()
            .tokens
            .get(index)
            .map(|t| t.address)
            .ok_or(FactoryError::IndexOutOfRange(index))
    }

    pub fn get_token_sale(&self, index: usize) -> Result<SaleRecord, FactoryError> {
        self.state
            .lock()
            .sales
            .get(index)
            .cloned()
            .ok_or(FactoryError::IndexOutOfRange(index))
    }

    pub fn token_to_sale(&self, token: Address) -> Result<SaleRecord, FactoryError> {
        self.state
            .lock()
            .sales
            .by_token(&token)
            .cloned()
            .ok_or(FactoryError::UnknownToken(token))
    }

    /// Unit price once `sold` token units are gone.
    pub fn get_cost(&self, sold: Balance) -> Result<Balance, FactoryError> {
        let curve = self.state.lock().config.curve;
        Ok(curve.price_at(sold)?)
    }

    /// Native value a buy of `amount` would cost right now.
    pub fn quote(&self, token: Address, amount: Balance) -> Result<Balance, FactoryError> {
        let st = self.state.lock();
        let idx = st.index_of(&token)?;
        let sold = st.sales.get(idx).map(|s| s.sold).unwrap_or_default();
        let cost = st.config.curve.cost(sold, amount)?;
        debug!(token = %token, amount, cost, "quote");
        Ok(cost)
    }

    pub fn token_info(&self, token: Address) -> Result<TokenInfo, FactoryError> {
        let st = self.state.lock();
        let idx = st.index_of(&token)?;
        Ok(TokenInfo::from(&st.tokens[idx]))
    }

    pub fn balance_of(&self, token: Address, holder: Address) -> Result<Balance, FactoryError> {
        let st = self.state.lock();
        let idx = st.index_of(&token)?;
        Ok(st.tokens[idx].balance_of(holder))
    }

    pub fn allowance(&self, token: Address, holder: Address, spender: Address) -> Result<Balance, FactoryError> {
        let st = self.state.lock();
        let idx = st.index_of(&token)?;
        Ok(st.tokens[idx].allowance(holder, spender))
    }

    pub fn token_owner(&self, token: Address) -> Result<Address, FactoryError> {
        Ok(self.token_info(token)?.owner)
    }

    pub fn token_creator(&self, token: Address) -> Result<Address, FactoryError> {
        Ok(self.token_info(token)?.creator)
    }

    pub fn fees(&self) -> FeeLedger {
        self.state.lock().fees
    }

    /// Native balance of the factory account on the ledger.
    pub fn native_balance(&self) -> Balance {
        let address = self.state.lock().address;
        self.ledger.balance_of(address)
    }

    /// Deep copy of the whole state, consistent at one point in time.
    pub fn snapshot(&self) -> FactoryState {
        self.state.lock().clone()
    }

    // ----- mutations -----

    /// Launch a token. `paid` must equal the platform fee exactly.
    pub fn create(
        &self,
        caller: Address,
        name: &str,
        symbol: &str,
        paid: Balance,
    ) -> Result<Address, FactoryError> {
        let name = name.trim();
        let symbol = symbol.trim();
        if name.is_empty() {
            return Err(FactoryError::InvalidMetadata("name must not be empty"));
        }
        if symbol.is_empty() {
            return Err(FactoryError::InvalidMetadata("symbol must not be empty"));
        }

        let mut guard = self.state.lock();
        let st = &mut *guard;
        if caller == st.address {
            return Err(FactoryError::ReservedAccount);
        }
        let expected = st.fees.platform_fee();
        if paid != expected {
            warn!(caller = %caller, expected, paid, "create rejected: wrong fee");
            return Err(FactoryError::InvalidFee { expected, paid });
        }
        st.fees.ensure_collectable()?;

        let index = st.tokens.len();
        let address = ValueToken::derive_address(st.address, index as u64);
        if st.sales.contains(&address) {
            return Err(FactoryError::InvalidConfig(format!("token address collision at {address}")));
        }

        self.ledger.transfer(caller, st.address, paid)?;

        let now = self.now();
        st.tokens.push(ValueToken::new(
            address,
            name,
            symbol,
            st.address,
            caller,
            st.config.total_supply,
        ));
        st.sales.open(address, caller, now);
        st.fees.collect()?;

        info!(token = %address, index, creator = %caller, %name, %symbol, "token created");
        self.emit(FactoryEvent::Created { token: address, creator: caller, index });
        Ok(address)
    }

    /// Buy `amount` token units from an open sale, paying `paid` native value.
    pub fn buy(
        &self,
        caller: Address,
        token: Address,
        amount: Balance,
        paid: Balance,
    ) -> Result<Purchase, FactoryError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if caller == st.address {
            return Err(FactoryError::ReservedAccount);
        }
        if caller.is_zero() {
            return Err(TokenError::ZeroAddress.into());
        }
        let idx = st.index_of(&token)?;
        let sale = st.sales.get(idx).cloned().ok_or(FactoryError::UnknownToken(token))?;
        if !sale.is_open() {
            return Err(FactoryError::SaleClosed);
        }

        let inventory = st.tokens[idx].balance_of(st.address);
        let (min, max) = (st.config.min_purchase, st.config.max_purchase.min(inventory));
        if amount < min || amount > max {
            return Err(FactoryError::AmountOutOfRange { min, max, requested: amount });
        }

        let cost = st.config.curve.cost(sale.sold, amount)?;
        if paid < cost {
            warn!(token = %token, buyer = %caller, cost, paid, "buy rejected: underpaid");
            return Err(FactoryError::InsufficientPayment { required: cost, paid });
        }
        let sold = sale.sold.checked_add(amount).ok_or(FactoryError::MathOverflow)?;
        let raised = sale.raised.checked_add(paid).ok_or(FactoryError::MathOverflow)?;

        self.ledger.transfer(caller, st.address, paid)?;

        let now = self.now();
        let factory = st.address;
        st.tokens[idx].transfer(factory, caller, amount)?;
        let closing = st.config.closing;
        let closed = st.sales.record_purchase(idx, amount, paid, &closing, now);

        info!(token = %token, buyer = %caller, amount, paid, sold, raised, "tokens bought");
        self.emit(FactoryEvent::Bought { token, buyer: caller, amount, paid });
        if closed {
            info!(token = %token, sold, raised, "sale closed");
            self.emit(FactoryEvent::SaleClosed { token, sold, raised });
        }
        Ok(Purchase { token, amount, cost, paid, sold, raised, closed })
    }

    /// Creator moves a closed sale's proceeds and unsold tokens to the liquidity sink.
    pub fn deposit(&self, caller: Address, token: Address) -> Result<Settlement, FactoryError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        let idx = st.index_of(&token)?;
        let sale = st.sales.get(idx).cloned().ok_or(FactoryError::UnknownToken(token))?;
        if caller != sale.creator {
            return Err(FactoryError::NotCreator);
        }
        match sale.status {
            SaleStatus::Open => return Err(FactoryError::SaleStillOpen),
            SaleStatus::Settled => return Err(FactoryError::AlreadySettled),
            SaleStatus::Closed => {}
        }

        let destination = self.sink.destination(&sale);
        if destination.is_zero() {
            return Err(TokenError::ZeroAddress.into());
        }
        let factory = st.address;
        if destination == factory {
            return Err(FactoryError::ReservedAccount);
        }
        let inventory = st.tokens[idx].balance_of(factory);

        self.ledger.transfer(factory, destination, sale.raised)?;

        let now = self.now();
        st.tokens[idx].transfer(factory, destination, inventory)?;
        st.sales.mark_settled(idx, now);

        info!(token = %token, destination = %destination, value = sale.raised, tokens = inventory, "sale deposited");
        self.emit(FactoryEvent::Deposited {
            token,
            destination,
            value: sale.raised,
            tokens: inventory,
        });
        Ok(Settlement { token, destination, value: sale.raised, tokens: inventory })
    }

    /// Owner withdraws collected platform fees.
    pub fn withdraw(&self, caller: Address, amount: Balance) -> Result<(), FactoryError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if caller != st.config.owner {
            warn!(caller = %caller, "withdraw rejected: not owner");
            return Err(FactoryError::NotOwner);
        }
        if amount == 0 {
            return Err(FactoryError::ZeroAmount);
        }
        st.fees.ensure_withdrawable(amount)?;

        self.ledger.transfer(st.address, caller, amount)?;
        st.fees.record_withdrawal(amount)?;

        info!(to = %caller, amount, remaining = st.fees.available(), "fees withdrawn");
        self.emit(FactoryEvent::FeesWithdrawn { to: caller, amount });
        Ok(())
    }

    pub fn transfer(
        &self,
        caller: Address,
        token: Address,
        to: Address,
        amount: Balance,
    ) -> Result<(), FactoryError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if caller == st.address {
            return Err(FactoryError::ReservedAccount);
        }
        let idx = st.index_of(&token)?;
        st.tokens[idx].transfer(caller, to, amount)?;
        debug!(token = %token, from = %caller, to = %to, amount, "token transfer");
        self.emit(FactoryEvent::Transfer { token, from: caller, to, amount });
        Ok(())
    }

    pub fn approve(
        &self,
        caller: Address,
        token: Address,
        spender: Address,
        amount: Balance,
    ) -> Result<(), FactoryError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if caller == st.address {
            return Err(FactoryError::ReservedAccount);
        }
        let idx = st.index_of(&token)?;
        st.tokens[idx].approve(caller, spender, amount);
        self.emit(FactoryEvent::Approval { token, holder: caller, spender, amount });
        Ok(())
    }

    pub fn transfer_from(
        &self,
        caller: Address,
        token: Address,
        from: Address,
        to: Address,
        amount: Balance,
    ) -> Result<(), FactoryError> {
        let mut guard = self.state.lock();
        let st = &mut *guard;
        if caller == st.address {
            return Err(FactoryError::ReservedAccount);
        }
        let idx = st.index_of(&token)?;
        st.tokens[idx].transfer_from(caller, from, to, amount)?;
        self.emit(FactoryEvent::Transfer { token, from, to, amount });
        Ok(())
    }
}

// ---------- Tests ----------
