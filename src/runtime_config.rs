// =============================================================================
// Runtime configuration — on-disk JSON, env-var secrets, CLI overrides
// =============================================================================
//
// Three layers, applied in order (§6 "Environment / configuration"):
// 1. `RuntimeConfig::load` reads a JSON file; every field carries
//    `#[serde(default = "...")]` so adding a field never breaks an existing
//    config file.
// 2. `RuntimeConfig::apply_env` overlays secrets that should never live on
//    disk in plaintext: exchange credentials, LLM provider key, notifier
//    webhook. Reads through `dotenv` the same way the teacher's `main.rs`
//    called `dotenv::dotenv()` before anything else.
// 3. Each binary's CLI flags (`CollectorArgs`/`AgentArgs`) overlay per-run
//    overrides on top of the loaded+enveloped config. Flags are hand-parsed
//    from `std::env::args()`, matching the teacher's own translated-from-
//    argparse style rather than pulling in a CLI-parsing crate for a dozen
//    flags.
//
// Persistence is atomic (write-tmp, rename) on every accepted mutation.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_symbol() -> String {
    "BTC-USDT-SWAP".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![default_symbol()]
}

fn default_timeframes() -> Vec<String> {
    vec!["1m".to_string(), "5m".to_string(), "15m".to_string()]
}

fn default_history_days() -> u32 {
    30
}

fn default_data_timeout_secs() -> u64 {
    120
}

fn default_data_freshness_threshold_secs() -> u64 {
    300
}

fn default_max_restarts() -> u32 {
    9999
}

fn default_leverage() -> u32 {
    5
}

fn default_interval_secs() -> u64 {
    60
}

fn default_llm_provider() -> String {
    "openai".to_string()
}

fn default_llm_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

fn default_proxy_port() -> u16 {
    0
}

/// Exchange credentials and demo/live selector. Never serialized into the
/// on-disk config file — populated from environment variables only.
#[derive(Debug, Clone, Default)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: String,
    pub demo: bool,
}

/// Outbound HTTP proxy, if the deployment needs one to reach the exchange
/// or LLM provider.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

/// LLM provider selection plus credentials, populated from environment.
#[derive(Debug, Clone, Default)]
pub struct LlmSecrets {
    pub provider: String,
    pub api_key: String,
}

/// Notifier webhook, populated from environment.
#[derive(Debug, Clone, Default)]
pub struct NotifierSecrets {
    pub enabled: bool,
    pub webhook_url: String,
}

/// Everything loaded from environment variables, layered on top of
/// [`RuntimeConfig`] after it's read from disk. None of this is persisted.
#[derive(Debug, Clone, Default)]
pub struct EnvOverlay {
    pub exchange: ExchangeCredentials,
    pub proxy: ProxyConfig,
    pub llm: LlmSecrets,
    pub notifier: NotifierSecrets,
}

fn env_bool(key: &str) -> bool {
    std::env::var(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(false)
}

impl EnvOverlay {
    /// Load a `.env` file if present (missing file is not an error, matching
    /// `dotenv::dotenv()`'s own contract), then read every recognized key.
    pub fn load() -> Self {
        let _ = dotenv::dotenv();

        Self {
            exchange: ExchangeCredentials {
                api_key: std::env::var("OKX_API_KEY").unwrap_or_default(),
                api_secret: std::env::var("OKX_API_SECRET").unwrap_or_default(),
                passphrase: std::env::var("OKX_PASSPHRASE").unwrap_or_default(),
                demo: env_bool("OKX_DEMO"),
            },
            proxy: ProxyConfig {
                enabled: env_bool("PROXY_ENABLED"),
                host: std::env::var("PROXY_HOST").unwrap_or_default(),
                port: std::env::var("PROXY_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default_proxy_port()),
                user: std::env::var("PROXY_USER").unwrap_or_default(),
                pass: std::env::var("PROXY_PASS").unwrap_or_default(),
            },
            llm: LlmSecrets {
                provider: std::env::var("LLM_PROVIDER").unwrap_or_else(|_| default_llm_provider()),
                api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            },
            notifier: NotifierSecrets {
                enabled: env_bool("NOTIFIER_ENABLED"),
                webhook_url: std::env::var("NOTIFIER_WEBHOOK_URL").unwrap_or_default(),
            },
        }
    }
}

/// Persisted, serde-default-backed settings (§6 "Persisted state" +
/// "Environment / configuration"). Secrets never live here; they come from
/// [`EnvOverlay`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_timeframes")]
    pub timeframes: Vec<String>,

    #[serde(default = "default_history_days")]
    pub history_days: u32,

    #[serde(default = "default_data_timeout_secs")]
    pub data_timeout_secs: u64,

    /// §4.7 freshness gate threshold for the feature aggregator — distinct
    /// from `data_timeout_secs`, which gates the collector watchdog restart.
    #[serde(default = "default_data_freshness_threshold_secs")]
    pub data_freshness_threshold_secs: u64,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_leverage")]
    pub default_leverage: u32,

    #[serde(default)]
    pub bot_start_time_ms: i64,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_false")]
    pub auto_execute: bool,

    #[serde(default = "default_llm_api_base")]
    pub llm_api_base: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub history_journal_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            timeframes: default_timeframes(),
            history_days: default_history_days(),
            data_timeout_secs: default_data_timeout_secs(),
            data_freshness_threshold_secs: default_data_freshness_threshold_secs(),
            max_restarts: default_max_restarts(),
            default_leverage: default_leverage(),
            bot_start_time_ms: 0,
            interval_secs: default_interval_secs(),
            auto_execute: false,
            llm_api_base: default_llm_api_base(),
            llm_model: default_llm_model(),
            llm_timeout_secs: default_llm_timeout_secs(),
            history_journal_enabled: true,
        }
    }
}

impl RuntimeConfig {
    /// Load from `path`, falling back to defaults (with a warning) if the
    /// file is missing or malformed — a fresh deployment should never fail
    /// to start just because `data/config.json` hasn't been seeded yet.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => {
                    info!(path = %path.display(), "runtime config loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse runtime config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                info!(path = %path.display(), "no runtime config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Persist via write-tmp, rename so a crash mid-write never corrupts the
    /// previous config.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("serialize runtime config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content).with_context(|| format!("write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path).with_context(|| format!("rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

/// Per-run overrides for the collector binary (§6 "CLI surface (collector)").
#[derive(Debug, Clone, Default)]
pub struct CollectorArgs {
    pub symbols: Option<Vec<String>>,
    pub timeframes: Option<Vec<String>>,
    pub history_days: Option<u32>,
    pub data_timeout_secs: Option<u64>,
    pub max_restarts: Option<u32>,
}

impl CollectorArgs {
    /// Hand-parsed `--flag value` / `--flag=value` pairs, matching the
    /// reference collector's own argparse-derived flag set.
    pub fn parse(args: &[String]) -> Self {
        let mut out = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let (flag, inline_value) = split_flag(arg);
            let value = |iter: &mut std::slice::Iter<String>| inline_value.clone().or_else(|| iter.next().cloned());
            match flag.as_str() {
                "--symbols" => out.symbols = value(&mut iter).map(|v| split_csv(&v)),
                "--timeframes" => out.timeframes = value(&mut iter).map(|v| split_csv(&v)),
                "--history-days" => out.history_days = value(&mut iter).and_then(|v| v.parse().ok()),
                "--data-timeout" => out.data_timeout_secs = value(&mut iter).and_then(|v| v.parse().ok()),
                "--max-restarts" => out.max_restarts = value(&mut iter).and_then(|v| v.parse().ok()),
                _ => {}
            }
        }
        out
    }

    pub fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(v) = &self.symbols {
            config.symbols = v.clone();
        }
        if let Some(v) = &self.timeframes {
            config.timeframes = v.clone();
        }
        if let Some(v) = self.history_days {
            config.history_days = v;
        }
        if let Some(v) = self.data_timeout_secs {
            config.data_timeout_secs = v;
        }
        if let Some(v) = self.max_restarts {
            config.max_restarts = v;
        }
    }
}

/// Per-run overrides for the trading-agent binary (§6 "CLI surface (trading
/// agent)").
#[derive(Debug, Clone, Default)]
pub struct AgentArgs {
    pub once: bool,
    pub continuous: bool,
    pub interval_secs: Option<u64>,
    pub auto_execute: bool,
}

impl AgentArgs {
    pub fn parse(args: &[String]) -> Self {
        let mut out = Self::default();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            let (flag, inline_value) = split_flag(arg);
            match flag.as_str() {
                "--once" => out.once = true,
                "--continuous" => out.continuous = true,
                "--auto-execute" => out.auto_execute = true,
                "--interval" => {
                    let value = inline_value.clone().or_else(|| iter.next().cloned());
                    out.interval_secs = value.and_then(|v| v.parse().ok());
                }
                _ => {}
            }
        }
        out
    }

    pub fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(v) = self.interval_secs {
            config.interval_secs = v;
        }
        if self.auto_execute {
            config.auto_execute = true;
        }
    }
}

fn split_flag(arg: &str) -> (String, Option<String>) {
    match arg.split_once('=') {
        Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
        None => (arg.to_string(), None),
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.symbols, default_symbols());
        assert_eq!(cfg.timeframes, default_timeframes());
        assert_eq!(cfg.history_days, 30);
        assert_eq!(cfg.max_restarts, 9999);
        assert!(!cfg.auto_execute);
        assert_eq!(cfg.data_timeout_secs, 120);
        assert_eq!(cfg.data_freshness_threshold_secs, 300);
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETH-USDT-SWAP"], "auto_execute": true }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETH-USDT-SWAP".to_string()]);
        assert!(cfg.auto_execute);
        assert_eq!(cfg.interval_secs, 60);
    }

    #[test]
    fn collector_args_parses_space_and_equals_forms() {
        let args: Vec<String> = vec![
            "--symbols".into(),
            "BTC-USDT-SWAP,ETH-USDT-SWAP".into(),
            "--history-days=7".into(),
            "--max-restarts".into(),
            "50".into(),
        ];
        let parsed = CollectorArgs::parse(&args);
        assert_eq!(parsed.symbols, Some(vec!["BTC-USDT-SWAP".to_string(), "ETH-USDT-SWAP".to_string()]));
        assert_eq!(parsed.history_days, Some(7));
        assert_eq!(parsed.max_restarts, Some(50));
    }

    #[test]
    fn collector_args_apply_overrides_only_set_fields() {
        let mut config = RuntimeConfig::default();
        let parsed = CollectorArgs { history_days: Some(3), ..Default::default() };
        parsed.apply(&mut config);
        assert_eq!(config.history_days, 3);
        assert_eq!(config.symbols, default_symbols());
    }

    #[test]
    fn agent_args_parses_flags() {
        let args: Vec<String> = vec!["--once".into(), "--auto-execute".into(), "--interval".into(), "30".into()];
        let parsed = AgentArgs::parse(&args);
        assert!(parsed.once);
        assert!(parsed.auto_execute);
        assert_eq!(parsed.interval_secs, Some(30));
    }

    #[test]
    fn save_then_load_round_trips() {
        let path = "/tmp/okx-swap-agent-test-runtime-config.json";
        let _ = std::fs::remove_file(path);
        let mut config = RuntimeConfig::default();
        config.symbols = vec!["ETH-USDT-SWAP".to_string()];
        config.save(path).unwrap();

        let reloaded = RuntimeConfig::load_or_default(path);
        assert_eq!(reloaded.symbols, vec!["ETH-USDT-SWAP".to_string()]);
        let _ = std::fs::remove_file(path);
    }
}
