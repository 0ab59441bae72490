//! Cybozu HTTP client with credential handling and safe logging.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::cybozu::csv_job::CsvJobClient;
use crate::cybozu::customize::CustomizeClient;
use crate::cybozu::file::FileClient;
use crate::cybozu::scheduler::TransferScheduler;
use crate::cybozu::transport::{ReqwestTransport, Transport};
use crate::cybozu::GuestSpaceId;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Cybozu API requests.
const CLIENT_USER_AGENT: &str = concat!("cybozu-client/", env!("CARGO_PKG_VERSION"));

/// Password authentication header.
const CYBOZU_AUTHORIZATION: &str = "x-cybozu-authorization";

/// API token authentication header.
const CYBOZU_API_TOKEN: &str = "x-cybozu-api-token";

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &["filekey", "api_token", "token", "password"];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/k/v1/file.json`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/k/v1/file.json?fileKey=***`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// Credentials
// ─────────────────────────────────────────────────────────────────────────────

/// How requests authenticate against the Cybozu domain.
///
/// Secrets are wrapped in `SecretString` so they never show up through
/// `Debug` or logging.
#[derive(Clone)]
pub enum Credentials {
    /// Login name and password, sent as `X-Cybozu-Authorization`.
    Password {
        login: String,
        password: SecretString,
    },
    /// Kintone API token(s), sent as `X-Cybozu-API-Token`.
    /// Several tokens may be joined with commas.
    ApiToken(SecretString),
}

impl Credentials {
    pub fn password(login: impl Into<String>, password: impl Into<String>) -> Self {
        Credentials::Password {
            login: login.into(),
            password: SecretString::from(password.into()),
        }
    }

    pub fn api_token(token: impl Into<String>) -> Self {
        Credentials::ApiToken(SecretString::from(token.into()))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password { login, .. } => f
                .debug_struct("Password")
                .field("login", login)
                .field("password", &"[REDACTED]")
                .finish(),
            Credentials::ApiToken(_) => f.debug_tuple("ApiToken").field(&"[REDACTED]").finish(),
        }
    }
}

/// HTTP Basic authentication placed in front of the domain.
#[derive(Clone)]
pub struct BasicAuth {
    pub user: String,
    pub password: SecretString,
}

impl BasicAuth {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging based on the specified mode.
///
/// The result never contains the scheme, host, or fragment. File keys are
/// redacted because anyone holding one can download the file.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CybozuClient
// ─────────────────────────────────────────────────────────────────────────────

/// Thread-safe HTTP client for the Kintone and User APIs.
///
/// Cloning is cheap; clones share the HTTP connection pool, the transport and
/// the transfer scheduler.
#[derive(Clone)]
pub struct CybozuClient {
    /// Used to build requests; execution goes through `transport`.
    http: reqwest::Client,
    transport: Arc<dyn Transport>,
    config: Arc<ClientConfig>,
    /// Credential headers attached to every request.
    auth_headers: HeaderMap,
    scheduler: TransferScheduler,
}

impl CybozuClient {
    /// Creates a client that talks to the network through `reqwest`.
    ///
    /// # Errors
    ///
    /// - `AppError::InvalidConfig` - configuration rejected by `validate`
    /// - `AppError::Internal` - the HTTP client fails to initialize
    pub fn new(config: ClientConfig) -> Result<Self, AppError> {
        config.validate()?;
        let http = build_http_client(config.timeout)?;
        let transport = Arc::new(ReqwestTransport::new(http.clone()));
        Self::assemble(config, http, transport)
    }

    /// Creates a client that executes requests through a custom transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, AppError> {
        config.validate()?;
        let http = build_http_client(config.timeout)?;
        Self::assemble(config, http, transport)
    }

    /// Creates a client from `CYBOZU_*` environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        Self::new(ClientConfig::from_env()?)
    }

    fn assemble(
        config: ClientConfig,
        http: reqwest::Client,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, AppError> {
        let auth_headers = build_auth_headers(&config)?;
        let scheduler = TransferScheduler::new(config.max_concurrent_transfers);
        Ok(Self {
            http,
            transport,
            config: Arc::new(config),
            auth_headers,
            scheduler,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Scheduler that bounds batch transfers.
    pub fn scheduler(&self) -> &TransferScheduler {
        &self.scheduler
    }

    /// File upload/download operations.
    pub fn files(&self) -> FileClient {
        FileClient::new(self.clone())
    }

    /// CSV import jobs on the User API.
    pub fn csv_jobs(&self) -> CsvJobClient {
        CsvJobClient::new(self.clone())
    }

    /// App customization (preview settings).
    pub fn customize(&self) -> CustomizeClient {
        CustomizeClient::new(self.clone())
    }

    /// Builds a Kintone API URL.
    ///
    /// `file` becomes `/k/v1/file.json`, or `/k/guest/{id}/v1/file.json`
    /// inside a guest space.
    pub fn kintone_url(&self, api: &str, guest: Option<GuestSpaceId>) -> Result<Url, AppError> {
        let path = match guest {
            Some(space) => format!("/k/guest/{}/v1/{}.json", space, api),
            None => format!("/k/v1/{}.json", api),
        };
        self.join(&path)
    }

    /// Builds a User API URL: `csv/result` becomes `/v1/csv/result.json`.
    pub fn user_url(&self, api: &str) -> Result<Url, AppError> {
        self.join(&format!("/v1/{}.json", api))
    }

    fn join(&self, path: &str) -> Result<Url, AppError> {
        self.config
            .base_url
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// Starts an authenticated request.
    pub(crate) fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .headers(self.auth_headers.clone())
    }

    /// Executes a request with timing, logging, and error interpretation.
    ///
    /// This is the single initiation step shared by every operation. A
    /// returned response always has a 2xx status and an unread body.
    ///
    /// # Security
    ///
    /// - Never logs credential headers or bodies
    /// - Sanitizes URLs before logging
    pub(crate) async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AppError> {
        let request = builder.build().map_err(|e| {
            AppError::Internal(format!("Failed to build request: {}", e.without_url()))
        })?;

        let method = request.method().clone();
        let sanitized_url = sanitize_url_for_logs(request.url(), self.config.logging_mode);
        let start = Instant::now();

        let result = self.transport.execute(request).await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                info!(
                    "[CYBOZU] {} {} {} {}ms",
                    method,
                    sanitized_url,
                    response.status().as_u16(),
                    duration_ms
                );
                Ok(response)
            }
            Err(failure) => {
                let err = AppError::from(failure);
                match err.status() {
                    Some(status) => warn!(
                        "[CYBOZU] {} {} {} {}ms: {}",
                        method,
                        sanitized_url,
                        status,
                        duration_ms,
                        err.log_safe_message()
                    ),
                    None => warn!(
                        "[CYBOZU] {} {} FAILED {}ms: {}",
                        method,
                        sanitized_url,
                        duration_ms,
                        err.log_safe_message()
                    ),
                }
                Err(err)
            }
        }
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Encodes the credential headers once; every request reuses them.
fn build_auth_headers(config: &ClientConfig) -> Result<HeaderMap, AppError> {
    let mut headers = HeaderMap::new();

    match &config.credentials {
        Credentials::Password { login, password } => {
            let encoded = BASE64.encode(format!("{}:{}", login, password.expose_secret()));
            headers.insert(
                HeaderName::from_static(CYBOZU_AUTHORIZATION),
                sensitive_header(&encoded)?,
            );
        }
        Credentials::ApiToken(token) => {
            headers.insert(
                HeaderName::from_static(CYBOZU_API_TOKEN),
                sensitive_header(token.expose_secret())?,
            );
        }
    }

    if let Some(basic) = &config.basic_auth {
        let encoded = BASE64.encode(format!("{}:{}", basic.user, basic.password.expose_secret()));
        headers.insert(AUTHORIZATION, sensitive_header(&format!("Basic {}", encoded))?);
    }

    Ok(headers)
}

fn sensitive_header(value: &str) -> Result<HeaderValue, AppError> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        AppError::InvalidConfig("Credentials contain characters not allowed in headers".to_string())
    })?;
    header.set_sensitive(true);
    Ok(header)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
