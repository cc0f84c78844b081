//! Configuration loader for the launchpad.
//!
//! Layers (highest precedence last):
//!   1) Built-in defaults
//!   2) Config file (explicit path or auto-discovered)
//!   3) Environment variables (optionally via .env)
//!
//! Amounts are decimal strings ("0.01", "1000000") so they survive every layer
//! without float rounding; they are converted to fixed-point when the engine
//! config is built.

use std::path::{Path, PathBuf};

use config as cfg;
use directories::ProjectDirs;
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    curve::PricingCurve,
    factory::FactoryConfig,
    sale::ClosingRule,
    units::{parse_units, UnitsError},
    Address, AddressError, DECIMALS,
};

const ENV_PREFIX: &str = "LAUNCHPAD";

/// Application config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: App,
    pub engine: Engine,
    pub storage: Storage,
    pub telemetry: Telemetry,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    pub name: String,
    /// "prod" | "staging" | "dev".
    pub environment: String,
}

/// Engine parameters. Addresses are 0x-hex, amounts decimal strings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Engine {
    /// The engine's own ledger account.
    pub engine_account: String,
    /// Fee withdrawal administrator.
    pub owner: String,
    pub platform_fee: String,
    pub total_supply: String,
    pub target: String,
    pub token_limit: String,
    pub min_purchase: String,
    pub max_purchase: String,
    pub price_floor: String,
    pub price_step: String,
    pub price_increment: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub backend: StorageBackend,
    /// Falls back to the platform data dir, then `./launchpad-data`.
    pub data_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// RUST_LOG-like directive, e.g. "info,aethernova_launchpad=debug".
    pub log_filter: String,
    pub json: bool,
}

impl Default for App {
    fn default() -> Self {
        Self {
            name: "aethernova-launchpad".into(),
            environment: "dev".into(),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            engine_account: Address::from_low_u64(0xfac7).to_string(),
            owner: Address::ZERO.to_string(),
            platform_fee: "0.01".into(),
            total_supply: "1000000".into(),
            target: "3".into(),
            token_limit: "500000".into(),
            min_purchase: "1".into(),
            max_purchase: "10000".into(),
            price_floor: "0.0001".into(),
            price_step: "0.0001".into(),
            price_increment: "10000".into(),
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self { backend: StorageBackend::Fs, data_dir: None }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            log_filter: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config build error: {0}")]
    Build(#[from] cfg::ConfigError),
    #[error("path not found `{0}`")]
    PathNotFound(String),
    #[error("invalid address in `{field}`: {source}")]
    InvalidAddress {
        field: &'static str,
        #[source]
        source: AddressError,
    },
    #[error("invalid amount in `{field}`: {source}")]
    InvalidAmount {
        field: &'static str,
        #[source]
        source: UnitsError,
    },
    #[error("`{0}` must be set to a non-zero address in prod")]
    MissingOwner(&'static str),
    #[error("invalid engine parameters: {0}")]
    InvalidEngine(String),
}

/// Load configuration: defaults -> file -> environment.
/// Env prefix `LAUNCHPAD__`, nested fields separated by `__`:
///   LAUNCHPAD__ENGINE__PLATFORM_FEE=0.02
///   LAUNCHPAD__STORAGE__BACKEND=memory
pub fn load(explicit_file: Option<&Path>) -> Result<Config, ConfigError> {
    let _ = dotenv();
    build(explicit_file, env_source())
}

fn env_source() -> cfg::Environment {
    cfg::Environment::with_prefix(ENV_PREFIX).separator("__")
}

fn build(explicit_file: Option<&Path>, env: cfg::Environment) -> Result<Config, ConfigError> {
    let defaults = cfg::Config::try_from(&Config::default())?;
    let mut builder = cfg::Config::builder().add_source(defaults);
    for path in discover_config_files(explicit_file)? {
        builder = builder.add_source(cfg::File::from(path));
    }
    let mut out: Config = builder.add_source(env).build()?.try_deserialize()?;
    validate_and_normalize(&mut out)?;
    Ok(out)
}

/// Precedence: explicit path, then the platform config dir, then `./launchpad.*`.
fn discover_config_files(explicit: Option<&Path>) -> Result<Vec<PathBuf>, ConfigError> {
    if let Some(p) = explicit {
        if p.exists() {
            return Ok(vec![p.to_path_buf()]);
        }
        return Err(ConfigError::PathNotFound(p.display().to_string()));
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(pd) = project_dirs() {
        let cd = pd.config_dir();
        for ext in ["toml", "yaml", "json"] {
            candidates.push(cd.join(format!("config.{ext}")));
        }
    }
    for ext in ["toml", "yaml", "json"] {
        candidates.push(PathBuf::from(format!("launchpad.{ext}")));
    }
    Ok(candidates.into_iter().filter(|c| c.exists()).collect())
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "Aethernova", "aethernova-launchpad")
}

fn validate_and_normalize(cfg: &mut Config) -> Result<(), ConfigError> {
    cfg.app.environment = cfg.app.environment.trim().to_lowercase();
    cfg.telemetry.log_filter = cfg.telemetry.log_filter.trim().to_string();

    let engine = cfg.factory_config()?;
    cfg.engine_account()?;
    if cfg.app.environment == "prod" && engine.owner.is_zero() {
        return Err(ConfigError::MissingOwner("engine.owner"));
    }
    Ok(())
}

fn address(field: &'static str, s: &str) -> Result<Address, ConfigError> {
    s.parse().map_err(|source| ConfigError::InvalidAddress { field, source })
}

fn amount(field: &'static str, s: &str) -> Result<u128, ConfigError> {
    parse_units(s, DECIMALS).map_err(|source| ConfigError::InvalidAmount { field, source })
}

impl Config {
    pub fn engine_account(&self) -> Result<Address, ConfigError> {
        let a = address("engine.engine_account", &self.engine.engine_account)?;
        if a.is_zero() {
            return Err(ConfigError::InvalidEngine("engine_account must not be zero".into()));
        }
        Ok(a)
    }

    /// Typed engine parameters.
    pub fn factory_config(&self) -> Result<FactoryConfig, ConfigError> {
        let e = &self.engine;
        let out = FactoryConfig {
            owner: address("engine.owner", &e.owner)?,
            platform_fee: amount("engine.platform_fee", &e.platform_fee)?,
            total_supply: amount("engine.total_supply", &e.total_supply)?,
            min_purchase: amount("engine.min_purchase", &e.min_purchase)?,
            max_purchase: amount("engine.max_purchase", &e.max_purchase)?,
            curve: PricingCurve {
                floor: amount("engine.price_floor", &e.price_floor)?,
                step: amount("engine.price_step", &e.price_step)?,
                increment: amount("engine.price_increment", &e.price_increment)?,
            },
            closing: ClosingRule {
                target_raised: amount("engine.target", &e.target)?,
                token_limit: amount("engine.token_limit", &e.token_limit)?,
            },
        };
        out.validate().map_err(|e| ConfigError::InvalidEngine(e.to_string()))?;
        Ok(out)
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(d) = &self.storage.data_dir {
            return d.clone();
        }
        project_dirs()
            .map(|pd| pd.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("launchpad-data"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;
    use crate::ONE;

    fn env(pairs: &[(&str, &str)]) -> cfg::Environment {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        env_source().source(Some(map))
    }

    fn nofile() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let mut cfg = Config::default();
        assert!(validate_and_normalize(&mut cfg).is_ok());
        let f = cfg.factory_config().unwrap();
        assert_eq!(f, FactoryConfig::new(Address::ZERO, ONE / 100));
        assert_eq!(cfg.engine_account().unwrap(), Address::from_low_u64(0xfac7));
    }

    #[test]
    fn prod_requires_owner() {
        let mut cfg = Config::default();
        cfg.app.environment = " PROD ".into();
        assert!(matches!(validate_and_normalize(&mut cfg), Err(ConfigError::MissingOwner(_))));

        cfg.engine.owner = Address::from_low_u64(1).to_string();
        assert!(validate_and_normalize(&mut cfg).is_ok());
        assert_eq!(cfg.app.environment, "prod");
    }

    #[test]
    fn bad_values_rejected() {
        let mut cfg = Config::default();
        cfg.engine.platform_fee = "0.0000000000000000001".into();
        assert!(matches!(
            validate_and_normalize(&mut cfg),
            Err(ConfigError::InvalidAmount { field: "engine.platform_fee", .. })
        ));

        let mut cfg = Config::default();
        cfg.engine.owner = "0x1234".into();
        assert!(matches!(validate_and_normalize(&mut cfg), Err(ConfigError::InvalidAddress { .. })));

        let mut cfg = Config::default();
        cfg.engine.min_purchase = "20000".into();
        assert!(matches!(validate_and_normalize(&mut cfg), Err(ConfigError::InvalidEngine(_))));
    }

    #[test]
    fn env_overrides_defaults() {
        let dir = nofile();
        let file = dir.path().join("launchpad.toml");
        std::fs::write(&file, "[engine]\nplatform_fee = \"0.05\"\n").unwrap();

        let cfg = build(
            Some(&file),
            env(&[("LAUNCHPAD__ENGINE__TARGET", "5"), ("LAUNCHPAD__STORAGE__BACKEND", "memory")]),
        )
        .unwrap();
        let f = cfg.factory_config().unwrap();
        assert_eq!(f.platform_fee, 5 * ONE / 100);
        assert_eq!(f.closing.target_raised, 5 * ONE);
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    }

    #[test]
    fn env_beats_file() {
        let dir = nofile();
        let file = dir.path().join("launchpad.toml");
        std::fs::write(&file, "[engine]\nplatform_fee = \"0.05\"\n").unwrap();
        let cfg = build(Some(&file), env(&[("LAUNCHPAD__ENGINE__PLATFORM_FEE", "0.07")])).unwrap();
        assert_eq!(cfg.factory_config().unwrap().platform_fee, 7 * ONE / 100);
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let dir = nofile();
        let err = build(Some(&dir.path().join("nope.toml")), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::PathNotFound(_)));
    }

    #[test]
    fn explicit_data_dir_wins() {
        let mut cfg = Config::default();
        cfg.storage.data_dir = Some(PathBuf::from("/tmp/lp"));
        assert_eq!(cfg.data_dir(), PathBuf::from("/tmp/lp"));
    }
}
