// src/config.rs
// Node configuration from the environment, plus startup validation

use chrono::Duration as ChronoDuration;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::anchor_service::{AnchorOptions, MissingPolicy};
use crate::digest::DigestScheme;
use crate::ledger::{EthLedgerSettings, LedgerMode};
use crate::storage::StorageMode;

/// Secret used when `JWT_SECRET` is unset. Flagged by [`validate_config`].
pub const DEV_JWT_SECRET: &str = "securefin-dev-secret-not-for-production-use";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_addr: SocketAddr,
    pub storage_mode: StorageMode,
    pub sled_path: String,
    pub ledger_mode: LedgerMode,
    pub ledger: EthLedgerSettings,
    pub jwt_secret: String,
    pub jwt_expiry_secs: u64,
    pub verify_missing: MissingPolicy,
    pub digest_scheme: DigestScheme,
    pub anchor_claim_timeout_secs: u64,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    pub production: bool,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            storage_mode: StorageMode::Sled,
            sled_path: "./data/securefin".into(),
            ledger_mode: LedgerMode::Rpc,
            ledger: EthLedgerSettings::default(),
            jwt_secret: DEV_JWT_SECRET.into(),
            jwt_expiry_secs: 86_400,
            verify_missing: MissingPolicy::CreatePlaceholder,
            digest_scheme: DigestScheme::Content,
            anchor_claim_timeout_secs: 900,
            rate_limit_max_requests: 100,
            rate_limit_window_secs: 60,
            production: false,
            log_format: LogFormat::Pretty,
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| invalid(key, raw, e.to_string()))
}

impl Config {
    /// Read from the process environment (call `dotenvy::dotenv()` first).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("API_ADDR") {
            cfg.api_addr = v
                .trim()
                .parse()
                .map_err(|_| invalid("API_ADDR", &v, "expected IP:PORT"))?;
        }
        if let Some(v) = get("STORAGE_MODE") {
            cfg.storage_mode = StorageMode::parse(&v).ok_or_else(|| invalid("STORAGE_MODE", &v, "expected sled or memory"))?;
        }
        if let Some(v) = get("SLED_PATH") {
            cfg.sled_path = v;
        }
        if let Some(v) = get("LEDGER_MODE") {
            cfg.ledger_mode = LedgerMode::parse(&v).ok_or_else(|| invalid("LEDGER_MODE", &v, "expected rpc or simulated"))?;
        }
        if let Some(v) = get("BLOCKCHAIN_RPC") {
            cfg.ledger.rpc_url = v;
        }
        if let Some(v) = get("LEDGER_ARTIFACT_PATH") {
            cfg.ledger.artifact_path = PathBuf::from(v);
        }
        cfg.ledger.contract_address = get("LEDGER_ADDRESS");
        cfg.ledger.account = get("BLOCKCHAIN_ACCOUNT");
        if let Some(v) = get("LEDGER_GAS") {
            cfg.ledger.gas = parse_num("LEDGER_GAS", &v)?;
        }
        if let Some(v) = get("LEDGER_TIMEOUT_SECS") {
            cfg.ledger.request_timeout = Duration::from_secs(parse_num("LEDGER_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("LEDGER_RECEIPT_POLL_MS") {
            cfg.ledger.receipt_poll_interval = Duration::from_millis(parse_num("LEDGER_RECEIPT_POLL_MS", &v)?);
        }
        if let Some(v) = get("LEDGER_RECEIPT_ATTEMPTS") {
            cfg.ledger.receipt_attempts = parse_num("LEDGER_RECEIPT_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("JWT_SECRET") {
            cfg.jwt_secret = v;
        }
        if let Some(v) = get("JWT_EXPIRY_SECS") {
            cfg.jwt_expiry_secs = parse_num("JWT_EXPIRY_SECS", &v)?;
        }
        if let Some(v) = get("VERIFY_MISSING") {
            cfg.verify_missing = MissingPolicy::parse(&v).ok_or_else(|| invalid("VERIFY_MISSING", &v, "expected create or reject"))?;
        }
        if let Some(v) = get("DIGEST_SCHEME") {
            cfg.digest_scheme =
                DigestScheme::parse(&v).ok_or_else(|| invalid("DIGEST_SCHEME", &v, "expected content or timestamped"))?;
        }
        if let Some(v) = get("ANCHOR_CLAIM_TIMEOUT_SECS") {
            cfg.anchor_claim_timeout_secs = parse_num("ANCHOR_CLAIM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_MAX_REQUESTS") {
            cfg.rate_limit_max_requests = parse_num("RATE_LIMIT_MAX_REQUESTS", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_WINDOW_SECS") {
            cfg.rate_limit_window_secs = parse_num("RATE_LIMIT_WINDOW_SECS", &v)?;
        }
        if let Some(v) = get("ENVIRONMENT") {
            let env = v.trim().to_lowercase();
            cfg.production = env == "production" || env == "prod";
        }
        if let Some(v) = get("LOG_FORMAT") {
            cfg.log_format = match v.trim().to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => return Err(invalid("LOG_FORMAT", &v, "expected pretty or json")),
            };
        }

        Ok(cfg)
    }

    pub fn anchor_options(&self) -> AnchorOptions {
        AnchorOptions {
            missing: self.verify_missing,
            digest: self.digest_scheme,
            claim_timeout: ChronoDuration::seconds(self.anchor_claim_timeout_secs as i64),
        }
    }
}

/// Findings from `validate_config`. `valid` drops to false on the first error.
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub valid: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    production: bool,
}

impl ConfigValidation {
    fn for_config(cfg: &Config) -> Self {
        Self {
            valid: true,
            production: cfg.production,
            ..Default::default()
        }
    }

    fn add_warning(&mut self, msg: String) {
        self.warnings.push(msg);
    }

    fn add_error(&mut self, msg: String) {
        self.errors.push(msg);
        self.valid = false;
    }

    /// Tolerated on a dev box, fatal once `ENVIRONMENT=production`.
    fn add_dev_only(&mut self, msg: String) {
        if self.production {
            self.add_error(msg);
        } else {
            self.add_warning(msg);
        }
    }

    /// Log the findings; `start` refuses to bind while `valid` is false.
    pub fn print_summary(&self) {
        for w in &self.warnings {
            warn!("⚠️  config: {}", w);
        }
        for e in &self.errors {
            error!("❌ config: {}", e);
        }
        if self.valid && self.warnings.is_empty() {
            info!("✅ Configuration validation passed");
        }
    }
}

/// Check a loaded config for insecure or inconsistent settings
pub fn validate_config(cfg: &Config) -> ConfigValidation {
    let mut validation = ConfigValidation::for_config(cfg);

    validate_jwt(cfg, &mut validation);
    validate_ledger(cfg, &mut validation);
    validate_storage(cfg, &mut validation);
    check_rate_limits(cfg, &mut validation);

    validation
}

fn validate_jwt(cfg: &Config, validation: &mut ConfigValidation) {
    if cfg.jwt_secret == DEV_JWT_SECRET {
        validation.add_dev_only("JWT_SECRET not set - using the built-in development secret".into());
    } else if cfg.jwt_secret.len() < 32 {
        validation.add_warning(format!(
            "JWT_SECRET is too short ({} chars) - recommend at least 32 characters",
            cfg.jwt_secret.len()
        ));
    }

    if cfg.jwt_expiry_secs == 0 {
        validation.add_error("JWT_EXPIRY_SECS must be greater than zero".into());
    }
}

fn validate_ledger(cfg: &Config, validation: &mut ConfigValidation) {
    match cfg.ledger_mode {
        LedgerMode::Simulated => {
            validation.add_dev_only("LEDGER_MODE=simulated - anchors are not written to any chain".into());
        }
        LedgerMode::Rpc => {
            let url = &cfg.ledger.rpc_url;
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                validation.add_error(format!("BLOCKCHAIN_RPC must be an http(s) URL, got '{}'", url));
            }
            if cfg.ledger.contract_address.is_none() && !cfg.ledger.artifact_path.exists() {
                validation.add_warning(format!(
                    "contract artifact {} not found and LEDGER_ADDRESS unset - verification will fail until deployed",
                    cfg.ledger.artifact_path.display()
                ));
            }
            if cfg.ledger.receipt_attempts == 0 {
                validation.add_error("LEDGER_RECEIPT_ATTEMPTS must be at least 1".into());
            }
            let worst = cfg.ledger.max_submit_duration();
            if Duration::from_secs(cfg.anchor_claim_timeout_secs) <= worst {
                validation.add_error(format!(
                    "ANCHOR_CLAIM_TIMEOUT_SECS ({}) must exceed the slowest ledger submission ({}s) or a second verify can resubmit",
                    cfg.anchor_claim_timeout_secs,
                    worst.as_secs_f64().ceil() as u64
                ));
            }
        }
    }
}

fn validate_storage(cfg: &Config, validation: &mut ConfigValidation) {
    if cfg.storage_mode == StorageMode::Memory {
        validation.add_dev_only("STORAGE_MODE=memory - all records are lost on restart".into());
    }
    if cfg.production && cfg.verify_missing == MissingPolicy::CreatePlaceholder {
        validation.add_warning("VERIFY_MISSING=create - verify will invent placeholder records".into());
    }
}

fn check_rate_limits(cfg: &Config, validation: &mut ConfigValidation) {
    if cfg.rate_limit_max_requests == 0 {
        validation.add_error("RATE_LIMIT_MAX_REQUESTS must be greater than zero".into());
    } else if cfg.rate_limit_max_requests > 10_000 {
        validation.add_warning(format!(
            "RATE_LIMIT_MAX_REQUESTS is very high ({}) - may not prevent DoS effectively",
            cfg.rate_limit_max_requests
        ));
    }
}

/// Generate a secure random secret suitable for `JWT_SECRET`
pub fn generate_secret() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();

    (0..64)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}
