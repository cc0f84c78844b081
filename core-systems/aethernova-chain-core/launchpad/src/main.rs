// aethernova-chain-core/launchpad/src/main.rs
//! Operator CLI for the launchpad engine.
//!
//! Each invocation locks the data directory, loads the factory and the dev
//! ledger, runs one operation, saves and prints the result as JSON on stdout.
//! The lock is held from load to save. Logs go to stderr.

use std::{path::PathBuf, sync::Arc};

use aethernova_launchpad::{
    config::{self, StorageBackend},
    storage::{DirLock, FactoryStore, FsStorage},
    telemetry::{self, LoggingConfig},
    units::{format_units, parse_units},
    Address, Balance, CreatorSink, Factory, MemoryLedger, NativeLedger, SaleRecord, DECIMALS,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "launchpad", version, about = "Bonding-curve token launchpad")]
struct Cli {
    /// Config file (toml/yaml/json).
    #[arg(long, env = "LAUNCHPAD_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Overrides `storage.data_dir`.
    #[arg(long, env = "LAUNCHPAD_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deploy a fresh factory into the store.
    Init,
    /// Credit native value to an account on the dev ledger.
    Fund { to: Address, amount: String },
    /// Launch a token. Pays the platform fee unless `--paid` says otherwise.
    Create {
        #[arg(long)]
        from: Address,
        name: String,
        symbol: String,
        #[arg(long)]
        paid: Option<String>,
    },
    /// Buy tokens. Pays the current quote unless `--paid` says otherwise.
    Buy {
        #[arg(long)]
        from: Address,
        token: Address,
        amount: String,
        #[arg(long)]
        paid: Option<String>,
    },
    /// Move a closed sale's proceeds and unsold tokens to the creator.
    Deposit {
        #[arg(long)]
        from: Address,
        token: Address,
    },
    /// Owner withdraws platform fees.
    Withdraw {
        #[arg(long)]
        from: Address,
        amount: String,
    },
    /// Transfer launched tokens.
    Transfer {
        #[arg(long)]
        from: Address,
        token: Address,
        to: Address,
        amount: String,
    },
    /// Show one sale, by creation index or token address.
    Sale { key: String },
    /// List all launched tokens with their sales.
    Tokens,
    /// Unit price after `sold` tokens.
    Cost { sold: String },
    /// Native balance, or token balance with `--token`.
    Balance {
        account: Address,
        #[arg(long)]
        token: Option<Address>,
    },
}

impl Command {
    fn mutates(&self) -> bool {
        !matches!(
            self,
            Command::Sale { .. } | Command::Tokens | Command::Cost { .. } | Command::Balance { .. }
        )
    }
}

type Engine = Factory<MemoryLedger, CreatorSink>;

fn amount(s: &str) -> Result<Balance> {
    parse_units(s, DECIMALS).with_context(|| format!("invalid amount `{s}`"))
}

fn units(v: Balance) -> String {
    format_units(v, DECIMALS)
}

fn sale_json(index: usize, s: &SaleRecord) -> Value {
    json!({
        "index": index,
        "token": s.token,
        "creator": s.creator,
        "sold": units(s.sold),
        "raised": units(s.raised),
        "status": s.status,
        "created_at": s.created_at,
        "closed_at": s.closed_at,
        "settled_at": s.settled_at,
    })
}

/// Where the CLI keeps its state. Memory storage would forget every run.
fn store_dir(cfg: &config::Config) -> Result<PathBuf> {
    match cfg.storage.backend {
        StorageBackend::Fs => Ok(cfg.data_dir()),
        StorageBackend::Memory => {
            bail!("storage.backend = \"memory\" keeps nothing between CLI runs; use \"fs\"")
        }
    }
}

/// Sale key: creation index, or token address.
fn sale_index(f: &Engine, key: &str) -> Result<usize> {
    if let Ok(i) = key.parse::<usize>() {
        return Ok(i);
    }
    let token: Address = key
        .parse()
        .with_context(|| format!("`{key}` is neither an index nor an address"))?;
    f.snapshot()
        .sales
        .index_of(&token)
        .with_context(|| format!("unknown token {token}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref()).context("load config")?;
    if let Some(d) = &cli.data_dir {
        cfg.storage.data_dir = Some(d.clone());
    }
    telemetry::init(&LoggingConfig::from(&cfg.telemetry)).context("init logging")?;

    let dir = store_dir(&cfg)?;
    let _lock = DirLock::acquire(&dir)
        .await
        .with_context(|| format!("lock data dir {}", dir.display()))?;
    let store = FactoryStore::new(
        FsStorage::open(&dir)
            .await
            .with_context(|| format!("open store at {}", dir.display()))?,
    );

    let (factory, ledger) = if let Command::Init = cli.cmd {
        if store.is_initialized().await? {
            bail!("factory already initialized");
        }
        let ledger = Arc::new(MemoryLedger::new(cfg.engine_account()?));
        let factory = Factory::new(cfg.factory_config()?, ledger.clone(), Arc::new(CreatorSink), 64)?;
        (factory, ledger)
    } else {
        let state = store
            .load()
            .await?
            .context("factory not initialized; run `launchpad init` first")?;
        let snap = store.load_ledger().await?.unwrap_or_default();
        let ledger = Arc::new(if snap.balances.is_empty() {
            MemoryLedger::new(state.address)
        } else {
            MemoryLedger::from_snapshot(snap)
        });
        let factory = Factory::restore(state, ledger.clone(), Arc::new(CreatorSink), 64)?;
        (factory, ledger)
    };

    let mutates = cli.cmd.mutates();
    let out = run(cli.cmd, &factory, &ledger)?;
    if mutates {
        store
            .save(&factory.snapshot(), Some(&ledger.snapshot()))
            .await
            .context("save state")?;
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn run(cmd: Command, f: &Engine, ledger: &MemoryLedger) -> Result<Value> {
    let out = match cmd {
        Command::Init => {
            info!(factory = %f.address(), owner = %f.owner(), "initialized");
            json!({
                "factory": f.address(),
                "owner": f.owner(),
                "platform_fee": units(f.platform_fee()),
            })
        }
        Command::Fund { to, amount: a } => {
            ledger.mint(to, amount(&a)?)?;
            json!({ "account": to, "balance": units(ledger.balance_of(to)) })
        }
        Command::Create { from, name, symbol, paid } => {
            let paid = match paid {
                Some(p) => amount(&p)?,
                None => f.platform_fee(),
            };
            let token = f.create(from, &name, &symbol, paid)?;
            json!({ "token": token, "index": f.total_tokens() - 1 })
        }
        Command::Buy { from, token, amount: a, paid } => {
            let a = amount(&a)?;
            let paid = match paid {
                Some(p) => amount(&p)?,
                None => f.quote(token, a)?,
            };
            let p = f.buy(from, token, a, paid)?;
            json!({
                "token": p.token,
                "amount": units(p.amount),
                "cost": units(p.cost),
                "paid": units(p.paid),
                "sold": units(p.sold),
                "raised": units(p.raised),
                "closed": p.closed,
            })
        }
        Command::Deposit { from, token } => {
            let s = f.deposit(from, token)?;
            json!({
                "token": s.token,
                "destination": s.destination,
                "value": units(s.value),
                "tokens": units(s.tokens),
            })
        }
        Command::Withdraw { from, amount: a } => {
            let a = amount(&a)?;
            f.withdraw(from, a)?;
            json!({ "withdrawn": units(a), "available": units(f.fees().available()) })
        }
        Command::Transfer { from, token, to, amount: a } => {
            f.transfer(from, token, to, amount(&a)?)?;
            json!({ "from": from, "to": to, "balance": units(f.balance_of(token, from)?) })
        }
        Command::Sale { key } => {
            let index = sale_index(f, &key)?;
            sale_json(index, &f.get_token_sale(index)?)
        }
        Command::Tokens => {
            let state = f.snapshot();
            let tokens: Vec<Value> = state
                .tokens
                .iter()
                .zip(state.sales.iter())
                .enumerate()
                .map(|(i, (t, s))| {
                    let mut v = sale_json(i, s);
                    v["name"] = json!(t.name);
                    v["symbol"] = json!(t.symbol);
                    v
                })
                .collect();
            json!({
                "total": tokens.len(),
                "tokens": tokens,
                "fees": {
                    "collected": units(state.fees.collected()),
                    "withdrawn": units(state.fees.withdrawn()),
                    "available": units(state.fees.available()),
                },
            })
        }
        Command::Cost { sold } => {
            let price = f.get_cost(amount(&sold)?)?;
            json!({ "sold": sold, "price": units(price) })
        }
        Command::Balance { account, token } => match token {
            Some(t) => json!({ "account": account, "token": t, "balance": units(f.balance_of(t, account)?) }),
            None => json!({ "account": account, "balance": units(ledger.balance_of(account)) }),
        },
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aethernova_launchpad::{FactoryConfig, ONE};

    fn addr(x: u8) -> Address {
        Address::from_low_u64(x as u64)
    }

    fn engine() -> (Arc<Engine>, Arc<MemoryLedger>) {
        let ledger = Arc::new(MemoryLedger::new(addr(0xFE)));
        ledger.mint(addr(2), 10 * ONE).unwrap();
        ledger.mint(addr(3), 10 * ONE).unwrap();
        let f = Factory::new(FactoryConfig::new(addr(1), ONE / 100), ledger.clone(), Arc::new(CreatorSink), 8).unwrap();
        (f, ledger)
    }

    fn create(f: &Engine, ledger: &MemoryLedger, paid: Option<&str>) -> Result<Value> {
        let cmd = Command::Create {
            from: addr(2),
            name: "cli".into(),
            symbol: "CLI".into(),
            paid: paid.map(String::from),
        };
        run(cmd, f, ledger)
    }

    fn buy(f: &Engine, ledger: &MemoryLedger, token: Address, paid: Option<&str>) -> Result<Value> {
        let cmd = Command::Buy {
            from: addr(3),
            token,
            amount: "10000".into(),
            paid: paid.map(String::from),
        };
        run(cmd, f, ledger)
    }

    #[test]
    fn memory_backend_is_refused() {
        let mut cfg = config::Config::default();
        assert_eq!(store_dir(&cfg).unwrap(), cfg.data_dir());

        cfg.storage.backend = StorageBackend::Memory;
        let err = store_dir(&cfg).unwrap_err();
        assert!(err.to_string().contains("memory"));
    }

    #[test]
    fn create_pays_the_platform_fee_by_default() {
        let (f, ledger) = engine();
        let out = create(&f, &ledger, None).unwrap();
        assert_eq!(out["index"], 0);
        assert_eq!(f.fees().collected(), ONE / 100);
        assert_eq!(ledger.balance_of(addr(2)), 10 * ONE - ONE / 100);

        assert!(create(&f, &ledger, Some("0.5")).is_err());
        assert_eq!(f.total_tokens(), 1);
    }

    #[test]
    fn buy_pays_the_current_quote_by_default() {
        let (f, ledger) = engine();
        create(&f, &ledger, None).unwrap();
        let token = f.tokens(0).unwrap();

        let first = buy(&f, &ledger, token, None).unwrap();
        assert_eq!(first["cost"], "1");
        assert_eq!(first["paid"], "1");
        assert_eq!(first["closed"], false);

        let second = buy(&f, &ledger, token, None).unwrap();
        assert_eq!(second["cost"], "2");
        assert_eq!(second["raised"], "3");
        assert_eq!(second["closed"], true);
        assert_eq!(ledger.balance_of(addr(3)), 7 * ONE);
    }

    #[test]
    fn explicit_paid_overrides_the_quote() {
        let (f, ledger) = engine();
        create(&f, &ledger, None).unwrap();
        let token = f.tokens(0).unwrap();

        assert!(buy(&f, &ledger, token, Some("0.5")).is_err());
        let out = buy(&f, &ledger, token, Some("1.5")).unwrap();
        assert_eq!(out["cost"], "1");
        assert_eq!(out["paid"], "1.5");
    }

    #[test]
    fn sale_key_is_an_index_or_a_token_address() {
        let (f, ledger) = engine();
        create(&f, &ledger, None).unwrap();
        create(&f, &ledger, None).unwrap();
        let token = f.tokens(1).unwrap();

        let by_index = run(Command::Sale { key: "1".into() }, &f, &ledger).unwrap();
        let by_address = run(Command::Sale { key: token.to_string() }, &f, &ledger).unwrap();
        assert_eq!(by_index, by_address);
        assert_eq!(by_index["index"], 1);
        assert_eq!(by_index["token"], json!(token));

        assert!(run(Command::Sale { key: "2".into() }, &f, &ledger).is_err());
        let err = sale_index(&f, "pump").unwrap_err();
        assert!(err.to_string().contains("neither an index nor an address"));
        let err = sale_index(&f, &addr(0x99).to_string()).unwrap_err();
        assert!(err.to_string().contains("unknown token"));
    }
}
