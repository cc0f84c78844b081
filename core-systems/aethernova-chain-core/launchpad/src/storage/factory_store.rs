//! Factory state over a `Storage` backend.
//!
//! Layout:
//! - `factory/meta`                 config, factory address, fee ledger, token count
//! - `factory/token/<index:016x>`   token + its sale record
//! - `factory/by-token/<address>`   token address -> index
//! - `ledger/snapshot`              native balances of the dev ledger
//!
//! Saves go out as one batch so a reader never sees a half-written factory.
//! Callers that load, mutate and save from several processes hold a
//! `DirLock` on the data directory for the whole cycle.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{Batch, Storage, StorageError, TypedStorage};
use crate::{
    factory::{FactoryConfig, FactoryState},
    fees::FeeLedger,
    ledger::LedgerSnapshot,
    sale::{SaleRecord, SaleRegistry},
    token::ValueToken,
    Address,
};

const META_KEY: &[u8] = b"factory/meta";
const TOKEN_PREFIX: &str = "factory/token/";
const INDEX_PREFIX: &str = "factory/by-token/";
const LEDGER_KEY: &[u8] = b"ledger/snapshot";
const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StoredMeta {
    version: u32,
    address: Address,
    config: FactoryConfig,
    fees: FeeLedger,
    token_count: u64,
}

/// One launched token together with its sale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: ValueToken,
    pub sale: SaleRecord,
}

fn token_key(index: u64) -> Vec<u8> {
    format!("{TOKEN_PREFIX}{index:016x}").into_bytes()
}

fn index_key(token: &Address) -> Vec<u8> {
    format!("{INDEX_PREFIX}{token}").into_bytes()
}

pub struct FactoryStore<S: Storage> {
    db: TypedStorage<S>,
}

impl<S: Storage> FactoryStore<S> {
    pub fn new(inner: S) -> Self {
        Self { db: TypedStorage::new(inner) }
    }

    pub async fn is_initialized(&self) -> Result<bool, StorageError> {
        self.db.exists(META_KEY).await
    }

    /// Persist the factory and, if given, the ledger in a single batch.
    #[instrument(skip_all, fields(factory = %state.address))]
    pub async fn save(&self, state: &FactoryState, ledger: Option<&LedgerSnapshot>) -> Result<(), StorageError> {
        if state.tokens.len() != state.sales.len() {
            return Err(StorageError::Corrupt("token/sale count mismatch".into()));
        }
        let meta = StoredMeta {
            version: SCHEMA_VERSION,
            address: state.address,
            config: state.config.clone(),
            fees: state.fees,
            token_count: state.tokens.len() as u64,
        };
        let mut batch = Batch::default().put_typed(META_KEY, &meta)?;
        for (i, (token, sale)) in state.tokens.iter().zip(state.sales.iter()).enumerate() {
            let entry = StoredToken { token: token.clone(), sale: sale.clone() };
            batch = batch
                .put_typed(token_key(i as u64), &entry)?
                .put_typed(index_key(&token.address), &(i as u64))?;
        }
        if let Some(snap) = ledger {
            batch = batch.put_typed(LEDGER_KEY, snap)?;
        }
        let items = batch.len();
        self.db.write_batch(batch).await?;
        debug!(factory = %state.address, tokens = meta.token_count, items, "factory saved");
        Ok(())
    }

    /// Rebuild the whole factory state, or `None` for an empty store.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<FactoryState>, StorageError> {
        let Some(meta) = self.db.get::<StoredMeta>(META_KEY).await? else {
            return Ok(None);
        };
        if meta.version != SCHEMA_VERSION {
            return Err(StorageError::Corrupt(format!("unsupported schema version {}", meta.version)));
        }
        let mut tokens = Vec::with_capacity(meta.token_count as usize);
        let mut records = Vec::with_capacity(meta.token_count as usize);
        for i in 0..meta.token_count {
            let entry = self
                .entry(i)
                .await?
                .ok_or_else(|| StorageError::Corrupt(format!("missing token entry {i}")))?;
            tokens.push(entry.token);
            records.push(entry.sale);
        }
        info!(factory = %meta.address, tokens = tokens.len(), "factory loaded");
        Ok(Some(FactoryState {
            config: meta.config,
            address: meta.address,
            tokens,
            sales: SaleRegistry::from_records(records),
            fees: meta.fees,
        }))
    }

    pub async fn load_ledger(&self) -> Result<Option<LedgerSnapshot>, StorageError> {
        self.db.get(LEDGER_KEY).await
    }

    pub async fn token_count(&self) -> Result<u64, StorageError> {
        Ok(self
            .db
            .get::<StoredMeta>(META_KEY)
            .await?
            .map(|m| m.token_count)
            .unwrap_or(0))
    }

    pub async fn entry(&self, index: u64) -> Result<Option<StoredToken>, StorageError> {
        let entry: Option<StoredToken> = self.db.get(&token_key(index)).await?;
        if let Some(e) = &entry {
            if e.sale.token != e.token.address {
                return Err(StorageError::Corrupt(format!("entry {index}: sale/token address mismatch")));
            }
        }
        Ok(entry)
    }

    pub async fn sale_by_index(&self, index: u64) -> Result<Option<SaleRecord>, StorageError> {
        Ok(self.entry(index).await?.map(|e| e.sale))
    }

    pub async fn sale_by_token(&self, token: Address) -> Result<Option<SaleRecord>, StorageError> {
        match self.db.get::<u64>(&index_key(&token)).await? {
            Some(i) => self.sale_by_index(i).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use tempfile::TempDir;

    use super::*;
    use crate::{
        factory::{Factory, FactoryConfig, Purchase},
        ledger::{CreatorSink, MemoryLedger, NativeLedger},
        storage::{DirLock, FsStorage, MemStorage},
        ONE,
    };

    fn addr(x: u8) -> Address {
        Address::from_low_u64(x as u64)
    }

    fn populated() -> (Arc<MemoryLedger>, Arc<Factory<MemoryLedger>>) {
        let ledger = Arc::new(MemoryLedger::new(addr(0xFE)));
        ledger.mint(addr(2), 10 * ONE).unwrap();
        ledger.mint(addr(3), 10 * ONE).unwrap();
        let f = Factory::new(FactoryConfig::new(addr(1), ONE / 100), ledger.clone(), Arc::new(CreatorSink), 8).unwrap();
        let t0 = f.create(addr(2), "first", "ONE", ONE / 100).unwrap();
        f.create(addr(2), "second", "TWO", ONE / 100).unwrap();
        f.buy(addr(3), t0, 10_000 * ONE, ONE).unwrap();
        (ledger, f)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_store_loads_nothing() {
        let store = FactoryStore::new(MemStorage::new());
        assert!(!store.is_initialized().await.unwrap());
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(store.token_count().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn save_and_load_on_disk() {
        let (ledger, f) = populated();
        let dir = TempDir::new().unwrap();
        let state = f.snapshot();
        {
            let store = FactoryStore::new(FsStorage::open(dir.path()).await.unwrap());
            store.save(&state, Some(&ledger.snapshot())).await.unwrap();
        }

        let store = FactoryStore::new(FsStorage::open(dir.path()).await.unwrap());
        assert!(store.is_initialized().await.unwrap());
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.address, state.address);
        assert_eq!(loaded.config, state.config);
        assert_eq!(loaded.fees, state.fees);
        assert_eq!(loaded.tokens, state.tokens);
        assert_eq!(loaded.sales.iter().cloned().collect::<Vec<_>>(), state.sales.iter().cloned().collect::<Vec<_>>());

        let snap = store.load_ledger().await.unwrap().unwrap();
        assert_eq!(snap, ledger.snapshot());

        // resumes where it left off
        let ledger2 = Arc::new(MemoryLedger::from_snapshot(snap));
        let f2 = Factory::restore(loaded, ledger2, Arc::new(CreatorSink), 8).unwrap();
        let t0 = f2.tokens(0).unwrap();
        assert_eq!(f2.token_to_sale(t0).unwrap().sold, 10_000 * ONE);
        f2.buy(addr(3), t0, 10_000 * ONE, 2 * ONE).unwrap();
        assert!(!f2.token_to_sale(t0).unwrap().is_open());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn point_queries() {
        let (_, f) = populated();
        let store = FactoryStore::new(MemStorage::new());
        store.save(&f.snapshot(), None).await.unwrap();

        assert_eq!(store.token_count().await.unwrap(), 2);
        let t1 = f.tokens(1).unwrap();
        let sale = store.sale_by_token(t1).await.unwrap().unwrap();
        assert_eq!(sale, f.get_token_sale(1).unwrap());
        assert_eq!(store.sale_by_index(0).await.unwrap().unwrap().raised, ONE);
        assert!(store.sale_by_index(2).await.unwrap().is_none());
        assert!(store.sale_by_token(addr(0x99)).await.unwrap().is_none());
        assert!(store.load_ledger().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_save_keeps_last_committed_state() {
        let (ledger, f) = populated();
        let dir = TempDir::new().unwrap();
        let fs = FsStorage::open(dir.path()).await.unwrap();
        let store = FactoryStore::new(fs.clone());
        let saved = f.snapshot();
        store.save(&saved, Some(&ledger.snapshot())).await.unwrap();

        f.create(addr(2), "third", "THREE", ONE / 100).unwrap();
        let blocker = FsStorage::path_for(dir.path(), &token_key(1), fs.generation().await + 1);
        std::fs::create_dir_all(&blocker).unwrap();
        assert!(matches!(
            store.save(&f.snapshot(), Some(&ledger.snapshot())).await,
            Err(StorageError::Io(_))
        ));

        let reopened = FactoryStore::new(FsStorage::open(dir.path()).await.unwrap());
        let loaded = reopened.load().await.unwrap().unwrap();
        assert_eq!(loaded.tokens, saved.tokens);
        assert_eq!(loaded.fees, saved.fees);
        assert_eq!(reopened.token_count().await.unwrap(), 2);

        std::fs::remove_dir(&blocker).unwrap();
        reopened.save(&f.snapshot(), Some(&ledger.snapshot())).await.unwrap();
        assert_eq!(reopened.load().await.unwrap().unwrap().tokens.len(), 3);
    }

    /// One CLI-style run: lock, load, buy on token 1 at the current quote, save.
    async fn locked_buy(dir: PathBuf) -> Purchase {
        let _lock = DirLock::acquire(&dir).await.unwrap();
        let store = FactoryStore::new(FsStorage::open(&dir).await.unwrap());
        let state = store.load().await.unwrap().unwrap();
        let ledger = Arc::new(MemoryLedger::from_snapshot(store.load_ledger().await.unwrap().unwrap()));
        let f = Factory::restore(state, ledger.clone(), Arc::new(CreatorSink), 8).unwrap();
        let token = f.tokens(1).unwrap();
        let paid = f.quote(token, 10_000 * ONE).unwrap();
        let p = f.buy(addr(3), token, 10_000 * ONE, paid).unwrap();
        tokio::task::yield_now().await;
        store.save(&f.snapshot(), Some(&ledger.snapshot())).await.unwrap();
        p
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn locked_runs_on_one_dir_do_not_lose_updates() {
        let (ledger, f) = populated();
        let dir = TempDir::new().unwrap();
        FactoryStore::new(FsStorage::open(dir.path()).await.unwrap())
            .save(&f.snapshot(), Some(&ledger.snapshot()))
            .await
            .unwrap();

        let a = tokio::spawn(locked_buy(dir.path().to_path_buf()));
        let b = tokio::spawn(locked_buy(dir.path().to_path_buf()));
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let mut sold = [a.sold, b.sold];
        sold.sort();
        assert_eq!(sold, [10_000 * ONE, 20_000 * ONE]);

        let store = FactoryStore::new(FsStorage::open(dir.path()).await.unwrap());
        let sale = store.sale_by_index(1).await.unwrap().unwrap();
        assert_eq!(sale.sold, 20_000 * ONE);
        assert_eq!(sale.raised, 3 * ONE);
        let snap = store.load_ledger().await.unwrap().unwrap();
        assert_eq!(MemoryLedger::from_snapshot(snap).balance_of(addr(3)), 10 * ONE - ONE - 3 * ONE);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_entry_is_corruption() {
        let (_, f) = populated();
        let mem = MemStorage::new();
        let store = FactoryStore::new(mem.clone());
        store.save(&f.snapshot(), None).await.unwrap();
        mem.delete(&token_key(1)).await.unwrap();
        assert!(matches!(store.load().await, Err(StorageError::Corrupt(_))));
    }
}
