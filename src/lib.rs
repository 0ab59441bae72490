//! Client for the Kintone / Cybozu REST APIs.
//!
//! - [`cybozu::FileClient`]: upload and download files by key, singly or in
//!   bounded-parallel batches
//! - [`cybozu::CsvJobClient`]: CSV imports on the User API, polled until the
//!   job finishes, and CSV exports
//! - [`cybozu::CustomizeClient`]: the JavaScript/CSS customization of an app
//!
//! ```no_run
//! # async fn demo() -> Result<(), cybozu_client::AppError> {
//! use cybozu_client::cybozu::{CsvKind, CybozuClient};
//!
//! let client = CybozuClient::from_env()?;
//! let jobs = client.csv_jobs();
//! let policy = client.config().poll_policy.clone();
//! jobs.import_csv(CsvKind::Title, std::path::Path::new("titles.csv"), &policy).await?;
//! let export = jobs.fetch_result(CsvKind::Title).await?;
//! # let _ = export;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod cybozu;
pub mod error;
pub mod streaming;
pub mod validation;

pub use config::ClientConfig;
pub use cybozu::{CybozuClient, FileKey, GuestSpaceId, JobHandle, JobStatus};
pub use error::AppError;
pub use streaming::FileStream;
