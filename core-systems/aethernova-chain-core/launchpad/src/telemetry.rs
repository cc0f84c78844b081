//! Logging bootstrap.
//!
//! - Text or JSON output, RFC 3339 (UTC) timestamps, written to stderr so stdout
//!   stays free for command output.
//! - EnvFilter: explicit directive, else RUST_LOG, else "info".

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config;

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info,aethernova_launchpad=debug". None reads RUST_LOG.
    pub env_filter: Option<String>,
    pub json: bool,
    /// Print target, file and line.
    pub with_targets_and_lines: bool,
    /// ANSI colors (text format only).
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            env_filter: None,
            json: false,
            with_targets_and_lines: false,
            ansi: false,
        }
    }
}

impl From<&config::Telemetry> for LoggingConfig {
    fn from(t: &config::Telemetry) -> Self {
        Self {
            env_filter: Some(t.log_filter.clone()).filter(|s| !s.is_empty()),
            json: t.json,
            ..Self::default()
        }
    }
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init(cfg: &LoggingConfig) -> anyhow::Result<bool> {
    let filter = match &cfg.env_filter {
        Some(s) => EnvFilter::try_new(s.as_str())?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(cfg.with_targets_and_lines)
        .with_file(cfg.with_targets_and_lines)
        .with_line_number(cfg.with_targets_and_lines)
        .with_timer(fmt::time::UtcTime::rfc_3339());
    let fmt_layer = if cfg.json {
        base.json().with_ansi(false).flatten_event(true).boxed()
    } else {
        base.with_ansi(cfg.ansi).boxed()
    };

    Ok(Registry::default().with(filter).with(fmt_layer).try_init().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_telemetry_section() {
        let t = config::Telemetry { log_filter: "debug".into(), json: true };
        let l = LoggingConfig::from(&t);
        assert_eq!(l.env_filter.as_deref(), Some("debug"));
        assert!(l.json);

        let t = config::Telemetry { log_filter: String::new(), json: false };
        assert!(LoggingConfig::from(&t).env_filter.is_none());
    }

    #[test]
    fn init_is_idempotent_and_rejects_bad_filter() {
        let cfg = LoggingConfig { env_filter: Some("warn".into()), ..Default::default() };
        init(&cfg).unwrap();
        assert!(!init(&cfg).unwrap());

        let bad = LoggingConfig { env_filter: Some("launchpad=loud".into()), ..Default::default() };
        assert!(init(&bad).is_err());
    }
}
