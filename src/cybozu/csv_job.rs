//! CSV import jobs on the Cybozu User API.
//!
//! An import is asynchronous: the CSV is uploaded, a job is submitted with
//! the resulting key, and the job is polled until the server reports it
//! done. Exports are plain synchronous downloads.

use std::path::Path;
use std::time::{Duration, Instant};

use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::cybozu::client::CybozuClient;
use crate::cybozu::file::{upload_to, FileKey};
use crate::cybozu::redact_id;
use crate::error::AppError;
use crate::streaming::FileStream;
use crate::validation::csv_validator;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Error code reported when a failed job carries none.
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN";

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// CSV resources of the User API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CsvKind {
    User,
    Organization,
    Title,
    Group,
    UserOrganizations,
    UserServices,
}

impl CsvKind {
    /// Path segment under `/v1/csv/`.
    pub fn as_path(&self) -> &'static str {
        match self {
            CsvKind::User => "user",
            CsvKind::Organization => "organization",
            CsvKind::Title => "title",
            CsvKind::Group => "group",
            CsvKind::UserOrganizations => "userOrganizations",
            CsvKind::UserServices => "userServices",
        }
    }
}

impl std::fmt::Display for CsvKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_path())
    }
}

/// Identifier of a submitted import job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of an import job.
///
/// An error code exists only for a finished, failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed { error_code: String },
}

impl JobStatus {
    pub fn is_done(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    pub fn error_code(&self) -> Option<&str> {
        match self {
            JobStatus::Failed { error_code } => Some(error_code),
            _ => None,
        }
    }
}

/// How `wait_for_completion` paces its polls.
///
/// The interval starts at `initial_interval` and doubles after every
/// pending answer, capped at `max_interval`. Waiting stops with
/// `AppError::PollTimeout` once `timeout` has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl PollPolicy {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.initial_interval.is_zero() {
            return Err(AppError::InvalidConfig(
                "poll interval must be greater than 0".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(AppError::InvalidConfig(
                "poll timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Interval to use after `current`.
    ///
    /// Never drops below `initial_interval`, even when `max_interval` is
    /// configured smaller.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(self.max_interval)
            .max(self.initial_interval)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireSubmitRequest<'a> {
    file_key: &'a FileKey,
}

#[derive(Debug, Deserialize)]
struct WireSubmitResponse {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireJobResult {
    done: bool,
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error_code: Option<String>,
}

impl From<WireJobResult> for JobStatus {
    fn from(wire: WireJobResult) -> Self {
        match (wire.done, wire.success) {
            (false, _) => JobStatus::Pending,
            (true, true) => JobStatus::Succeeded,
            (true, false) => JobStatus::Failed {
                error_code: wire
                    .error_code
                    .filter(|code| !code.is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_string()),
            },
        }
    }
}

/// Job ids arrive as strings on some domains and as numbers on others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Number(number) => number.to_string(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// CsvJobClient
// ─────────────────────────────────────────────────────────────────────────────

/// CSV import/export operations bound to one client.
#[derive(Clone)]
pub struct CsvJobClient {
    client: CybozuClient,
}

impl CsvJobClient {
    pub fn new(client: CybozuClient) -> Self {
        Self { client }
    }

    /// Validates and uploads `path`, then starts an import job for `kind`.
    ///
    /// # Errors
    ///
    /// - `AppError::CsvInvalid` / `AppError::LocalFile` before any request
    /// - `AppError::Transfer` if the upload or submission fails
    pub async fn submit_csv(&self, kind: CsvKind, path: &Path) -> Result<JobHandle, AppError> {
        csv_validator::ensure_importable(path).await?;

        let upload_url = self.client.user_url("file")?;
        let file_key = upload_to(&self.client, upload_url, path, None).await?;

        let url = self.client.user_url(&format!("csv/{}", kind.as_path()))?;
        let body = WireSubmitRequest {
            file_key: &file_key,
        };
        let response = self
            .client
            .send(self.client.request(Method::POST, url).json(&body))
            .await?;

        let wire: WireSubmitResponse = response.json().await.map_err(|e| {
            AppError::transfer(format!("Failed to parse job response: {}", e.without_url()))
        })?;

        info!("[CSV-JOB] submitted {} import as job {}", kind, redact_id(&wire.id));
        Ok(JobHandle(wire.id))
    }

    /// Queries the job once.
    pub async fn poll_status(&self, handle: &JobHandle) -> Result<JobStatus, AppError> {
        let url = self.client.user_url("csv/result")?;
        let builder = self
            .client
            .request(Method::GET, url)
            .query(&[("id", handle.as_str())]);
        let response = self.client.send(builder).await?;

        let wire: WireJobResult = response.json().await.map_err(|e| {
            AppError::transfer(format!("Failed to parse job result: {}", e.without_url()))
        })?;

        Ok(wire.into())
    }

    /// Polls until the job finishes.
    ///
    /// Returns `JobStatus::Succeeded`; a failed job becomes
    /// `AppError::JobFailed` carrying the server's error code. A failing
    /// poll request ends the wait immediately with its error.
    pub async fn wait_for_completion(
        &self,
        handle: &JobHandle,
        policy: &PollPolicy,
    ) -> Result<JobStatus, AppError> {
        policy.validate()?;

        let poll_start = Instant::now();
        let mut interval = policy.initial_interval;
        let mut polls: u32 = 0;

        loop {
            let status = self.poll_status(handle).await?;
            polls += 1;

            match status {
                JobStatus::Succeeded => {
                    info!(
                        "[CSV-JOB] job {} succeeded after {} polls ({}ms)",
                        redact_id(handle.as_str()),
                        polls,
                        poll_start.elapsed().as_millis()
                    );
                    return Ok(status);
                }
                JobStatus::Failed { error_code } => {
                    warn!(
                        "[CSV-JOB] job {} failed with {}",
                        redact_id(handle.as_str()),
                        error_code
                    );
                    return Err(AppError::JobFailed {
                        job_id: handle.as_str().to_string(),
                        error_code,
                    });
                }
                JobStatus::Pending => {}
            }

            let elapsed = poll_start.elapsed();
            if elapsed >= policy.timeout {
                warn!(
                    "[CSV-JOB] job {} still pending after {}s",
                    redact_id(handle.as_str()),
                    elapsed.as_secs()
                );
                return Err(AppError::PollTimeout {
                    job_id: handle.as_str().to_string(),
                    waited_secs: elapsed.as_secs(),
                });
            }

            tokio::time::sleep(interval.min(policy.timeout - elapsed)).await;
            interval = policy.next_interval(interval);
        }
    }

    /// Submits `path` and waits for the job to finish.
    pub async fn import_csv(
        &self,
        kind: CsvKind,
        path: &Path,
        policy: &PollPolicy,
    ) -> Result<JobHandle, AppError> {
        let handle = self.submit_csv(kind, path).await?;
        self.wait_for_completion(&handle, policy).await?;
        Ok(handle)
    }

    /// Exports the current CSV for `kind`.
    pub async fn fetch_result(&self, kind: CsvKind) -> Result<Vec<u8>, AppError> {
        let response = self.initiate_export(kind).await?;
        let content = response
            .bytes()
            .await
            .map_err(|e| AppError::StreamRead(e.without_url().to_string()))?;

        info!("[CSV-JOB] exported {} ({} bytes)", kind, content.len());
        Ok(content.to_vec())
    }

    /// Exports the current CSV for `kind` as an unread stream.
    pub async fn fetch_result_stream(&self, kind: CsvKind) -> Result<FileStream, AppError> {
        let response = self.initiate_export(kind).await?;
        Ok(FileStream::from_response(response))
    }

    /// Exports the current CSV for `kind` into `destination`.
    pub async fn fetch_result_to_file(
        &self,
        kind: CsvKind,
        destination: &Path,
    ) -> Result<u64, AppError> {
        self.fetch_result_stream(kind)
            .await?
            .save_to(destination)
            .await
    }

    async fn initiate_export(&self, kind: CsvKind) -> Result<reqwest::Response, AppError> {
        let url = self.client.user_url(&format!("csv/{}", kind.as_path()))?;
        self.client.send(self.client.request(Method::GET, url)).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
