//! Client configuration.
//!
//! A `ClientConfig` is built either in code (`ClientConfig::new` plus the
//! `with_*` setters) or from `CYBOZU_*` environment variables.

use std::time::Duration;

use url::Url;

use crate::cybozu::client::{BasicAuth, Credentials, LoggingMode};
use crate::cybozu::csv_job::PollPolicy;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default limit for parallel transfers in batch operations.
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 10;

const ENV_URL: &str = "CYBOZU_URL";
const ENV_LOGIN: &str = "CYBOZU_LOGIN";
const ENV_PASSWORD: &str = "CYBOZU_PASSWORD";
const ENV_API_TOKEN: &str = "CYBOZU_API_TOKEN";
const ENV_BASIC_USER: &str = "CYBOZU_BASIC_AUTH_USER";
const ENV_BASIC_PASSWORD: &str = "CYBOZU_BASIC_AUTH_PASSWORD";
const ENV_TIMEOUT_SECS: &str = "CYBOZU_TIMEOUT_SECS";
const ENV_MAX_CONCURRENT: &str = "CYBOZU_MAX_CONCURRENT_TRANSFERS";
const ENV_POLL_INTERVAL_MS: &str = "CYBOZU_POLL_INTERVAL_MS";
const ENV_POLL_TIMEOUT_SECS: &str = "CYBOZU_POLL_TIMEOUT_SECS";

// ─────────────────────────────────────────────────────────────────────────────
// ClientConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a `CybozuClient` needs to reach a domain.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Domain root, e.g. `https://example.cybozu.com`.
    pub base_url: Url,
    pub credentials: Credentials,
    pub basic_auth: Option<BasicAuth>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Parallelism of `multi_upload` / `multi_download`.
    pub max_concurrent_transfers: usize,
    /// Default policy for `CsvJobClient::wait_for_completion`.
    pub poll_policy: PollPolicy,
    pub logging_mode: LoggingMode,
}

impl ClientConfig {
    pub fn new(base_url: Url, credentials: Credentials) -> Self {
        Self {
            base_url,
            credentials,
            basic_auth: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            poll_policy: PollPolicy::default(),
            logging_mode: LoggingMode::default(),
        }
    }

    pub fn with_basic_auth(mut self, basic_auth: BasicAuth) -> Self {
        self.basic_auth = Some(basic_auth);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent_transfers(mut self, max: usize) -> Self {
        self.max_concurrent_transfers = max;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    /// Reads the configuration from the process environment.
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `CYBOZU_URL` | domain root (required) |
    /// | `CYBOZU_API_TOKEN` | API token; takes precedence over login/password |
    /// | `CYBOZU_LOGIN`, `CYBOZU_PASSWORD` | password authentication |
    /// | `CYBOZU_BASIC_AUTH_USER`, `CYBOZU_BASIC_AUTH_PASSWORD` | optional Basic auth |
    /// | `CYBOZU_TIMEOUT_SECS` | request timeout |
    /// | `CYBOZU_MAX_CONCURRENT_TRANSFERS` | batch parallelism |
    /// | `CYBOZU_POLL_INTERVAL_MS`, `CYBOZU_POLL_TIMEOUT_SECS` | job polling |
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url = get(ENV_URL)
            .ok_or_else(|| AppError::InvalidConfig(format!("{} is not set", ENV_URL)))?;
        let base_url = Url::parse(raw_url.trim())
            .map_err(|e| AppError::InvalidConfig(format!("{} is not a valid URL: {}", ENV_URL, e)))?;

        let credentials = match (get(ENV_API_TOKEN), get(ENV_LOGIN), get(ENV_PASSWORD)) {
            (Some(token), _, _) => Credentials::api_token(token),
            (None, Some(login), Some(password)) => Credentials::password(login, password),
            _ => {
                return Err(AppError::InvalidConfig(format!(
                    "Set {} or both {} and {}",
                    ENV_API_TOKEN, ENV_LOGIN, ENV_PASSWORD
                )))
            }
        };

        let mut config = Self::new(base_url, credentials);

        match (get(ENV_BASIC_USER), get(ENV_BASIC_PASSWORD)) {
            (Some(user), Some(password)) => {
                config.basic_auth = Some(BasicAuth::new(user, password));
            }
            (None, None) => {}
            _ => {
                return Err(AppError::InvalidConfig(format!(
                    "{} and {} must be set together",
                    ENV_BASIC_USER, ENV_BASIC_PASSWORD
                )))
            }
        }

        if let Some(secs) = get(ENV_TIMEOUT_SECS) {
            config.timeout = Duration::from_secs(parse_number(ENV_TIMEOUT_SECS, &secs)?);
        }
        if let Some(max) = get(ENV_MAX_CONCURRENT) {
            config.max_concurrent_transfers = parse_number(ENV_MAX_CONCURRENT, &max)?;
        }
        if let Some(ms) = get(ENV_POLL_INTERVAL_MS) {
            config.poll_policy.initial_interval =
                Duration::from_millis(parse_number(ENV_POLL_INTERVAL_MS, &ms)?);
        }
        if let Some(secs) = get(ENV_POLL_TIMEOUT_SECS) {
            config.poll_policy.timeout =
                Duration::from_secs(parse_number(ENV_POLL_TIMEOUT_SECS, &secs)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks values that would otherwise fail later at runtime.
    pub fn validate(&self) -> Result<(), AppError> {
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(AppError::InvalidConfig(format!(
                "Unsupported URL scheme: {}",
                self.base_url.scheme()
            )));
        }
        if self.max_concurrent_transfers == 0 {
            return Err(AppError::InvalidConfig(
                "max_concurrent_transfers must be greater than 0".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(AppError::InvalidConfig("timeout must be greater than 0".to_string()));
        }
        self.poll_policy.validate()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, AppError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| AppError::InvalidConfig(format!("{} must be a number, got {:?}", key, value)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
