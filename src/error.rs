use thiserror::Error;

/// Patterns (lowercase) that indicate credential material not safe for logs.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "x-cybozu-authorization",
    "x-cybozu-api-token",
    "authorization:",
    "basic ",
    "password",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Transfer ──────────────────────────────────────────────────────────────
    /// A request failed at the transport or HTTP level.
    ///
    /// `message` is the server's JSON `message` field when the response body
    /// carried one, otherwise the raw transport error text.
    #[error("{message}")]
    Transfer {
        message: String,
        status: Option<u16>,
        code: Option<String>,
    },

    #[error("Failed to read response stream: {0}")]
    StreamRead(String),

    // ── CSV Jobs ──────────────────────────────────────────────────────────────
    #[error("CSV job {job_id} failed: {error_code}")]
    JobFailed { job_id: String, error_code: String },

    #[error("CSV job {job_id} did not finish within {waited_secs}s")]
    PollTimeout { job_id: String, waited_secs: u64 },

    // ── Local Files ───────────────────────────────────────────────────────────
    #[error("Cannot read {path}: {message}")]
    LocalFile { path: String, message: String },

    #[error("Invalid CSV: {0}")]
    CsvInvalid(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Builds a transfer error carrying only a message.
    pub fn transfer(message: impl Into<String>) -> Self {
        AppError::Transfer {
            message: message.into(),
            status: None,
            code: None,
        }
    }

    /// HTTP status of the failed response, if the failure had one.
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Transfer { status, .. } => *status,
            _ => None,
        }
    }

    /// Server error code (`code` in a Cybozu error body, or a job's `errorCode`).
    pub fn error_code(&self) -> Option<&str> {
        match self {
            AppError::Transfer { code, .. } => code.as_deref(),
            AppError::JobFailed { error_code, .. } => Some(error_code),
            _ => None,
        }
    }

    /// Renders the error for logging.
    /// Falls back to a generic text when credential material is detected.
    pub fn log_safe_message(&self) -> String {
        let msg = self.to_string();
        if contains_sensitive(&msg) {
            "[message redacted]".to_string()
        } else {
            msg
        }
    }
}
