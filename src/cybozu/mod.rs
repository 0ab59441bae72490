//! Kintone / Cybozu API layer.
//!
//! This module provides a thread-safe HTTP client for the Kintone and User
//! APIs and the operations built on it. Key features:
//!
//! - **One request path** shared by every call, so the error-message rule and
//!   logging behave the same for uploads, downloads, jobs and settings
//! - **Secure credential handling** via `secrecy::SecretString`
//! - **Safe logging** that never leaks credentials or file keys
//! - **Bounded parallelism** for batch transfers

pub mod client;
pub mod csv_job;
pub mod customize;
pub mod file;
pub mod scheduler;
pub mod transport;

#[cfg(test)]
pub(crate) mod fake_server;

pub use client::{sanitize_url_for_logs, BasicAuth, Credentials, CybozuClient, LoggingMode};
pub use csv_job::{CsvJobClient, CsvKind, JobHandle, JobStatus, PollPolicy};
pub use customize::{
    AppId, CustomizeClient, CustomizeEntry, CustomizeRequest, CustomizeResource, CustomizeScope,
    CustomizeSettings, FileInfo, FileRef, Platform,
};
pub use file::{FileClient, FileKey};
pub use scheduler::{TransferPermit, TransferScheduler};
pub use transport::{ReqwestTransport, Transport, TransportFailure};

/// Identifier of a guest space.
///
/// Resources inside a guest space live under `/k/guest/{id}/v1/...`;
/// passing `None` where an `Option<GuestSpaceId>` is accepted targets the
/// default namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestSpaceId(pub u64);

impl std::fmt::Display for GuestSpaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Redacts an opaque handle for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    match id.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &id[..idx]),
        None => id.to_string(),
    }
}
