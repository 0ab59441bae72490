//! Pre-flight checks for CSV files before they are imported.
//!
//! Only a fixed-size sample (512 KB) is read, so arbitrarily large files are
//! cheap to check. The sample catches what the import job would otherwise
//! reject minutes later:
//! - empty files
//! - UTF-8 encoding errors
//! - unparseable rows and inconsistent column counts
//!
//! User API CSV files usually carry no header row, so the first row only
//! fixes the expected column count.

use std::path::Path;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Size of the sample buffer for validation (512 KB).
pub const VALIDATION_SAMPLE_SIZE: usize = 512 * 1024;

/// Maximum number of rows checked in the sample.
const MAX_ROWS_TO_VALIDATE: usize = 1000;

/// UTF-8 BOM bytes.
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of checking a CSV file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvValidationResult {
    pub errors: Vec<CsvValidationError>,
    pub warnings: Vec<CsvValidationWarning>,
    pub file_size_bytes: u64,
    /// Column count of the first row.
    pub column_count: usize,
    /// Rows parsed within the sample.
    pub checked_rows: u64,
}

impl CsvValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn failed(error: CsvValidationError, file_size_bytes: u64) -> Self {
        Self {
            errors: vec![error],
            warnings: Vec::new(),
            file_size_bytes,
            column_count: 0,
            checked_rows: 0,
        }
    }
}

/// Problems that would make the import fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvValidationError {
    EmptyFile,
    NotUtf8,
    InconsistentColumns {
        expected: usize,
        found: usize,
        /// 1-based row number.
        row: u64,
    },
    Parse {
        message: String,
    },
}

impl std::fmt::Display for CsvValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CsvValidationError::EmptyFile => write!(f, "file is empty"),
            CsvValidationError::NotUtf8 => write!(f, "file is not valid UTF-8"),
            CsvValidationError::InconsistentColumns {
                expected,
                found,
                row,
            } => write!(
                f,
                "row {} has {} columns, expected {}",
                row, found, expected
            ),
            CsvValidationError::Parse { message } => write!(f, "{}", message),
        }
    }
}

/// Oddities that do not block the import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvValidationWarning {
    /// File starts with a UTF-8 BOM.
    HasBom,
    /// Only the first `VALIDATION_SAMPLE_SIZE` bytes were checked.
    SampleOnly { checked_rows: u64 },
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Checks a sample of the CSV file at `path`.
///
/// # Errors
///
/// Returns `AppError::LocalFile` only when the file cannot be read.
/// Problems with the content are reported in the result.
pub async fn validate(path: &Path) -> Result<CsvValidationResult, AppError> {
    let local_error = |e: std::io::Error| AppError::LocalFile {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let file_size_bytes = tokio::fs::metadata(path).await.map_err(local_error)?.len();
    if file_size_bytes == 0 {
        return Ok(CsvValidationResult::failed(CsvValidationError::EmptyFile, 0));
    }

    let sample_size = (file_size_bytes as usize).min(VALIDATION_SAMPLE_SIZE);
    let mut buffer = vec![0u8; sample_size];
    let mut file = File::open(path).await.map_err(local_error)?;
    file.read_exact(&mut buffer).await.map_err(local_error)?;

    let is_sample_only = file_size_bytes > sample_size as u64;
    Ok(validate_sample(&buffer, file_size_bytes, is_sample_only))
}

/// Runs `validate` and turns any content problem into
/// `AppError::CsvInvalid`.
pub async fn ensure_importable(path: &Path) -> Result<CsvValidationResult, AppError> {
    let result = validate(path).await?;

    if let Some(first) = result.errors.first() {
        warn!(
            "[CSV-JOB] rejected {} before upload: {}",
            path.display(),
            first
        );
        return Err(AppError::CsvInvalid(first.to_string()));
    }

    for warning in &result.warnings {
        info!("[CSV-JOB] {}: {:?}", path.display(), warning);
    }
    Ok(result)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn validate_sample(buffer: &[u8], file_size_bytes: u64, is_sample_only: bool) -> CsvValidationResult {
    let mut warnings = Vec::new();

    let data = match buffer.strip_prefix(UTF8_BOM) {
        Some(rest) => {
            warnings.push(CsvValidationWarning::HasBom);
            rest
        }
        None => buffer,
    };

    // The sample may end mid-row; only complete lines are checked.
    let data = match data.iter().rposition(|&b| b == b'\n') {
        Some(last_newline) if is_sample_only => &data[..=last_newline],
        _ => data,
    };

    if std::str::from_utf8(data).is_err() {
        let mut result = CsvValidationResult::failed(CsvValidationError::NotUtf8, file_size_bytes);
        result.warnings = warnings;
        return result;
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut errors = Vec::new();
    let mut column_count = 0;
    let mut checked_rows: u64 = 0;

    for record in reader.records().take(MAX_ROWS_TO_VALIDATE) {
        match record {
            Ok(record) => {
                checked_rows += 1;
                if checked_rows == 1 {
                    column_count = record.len();
                } else if record.len() != column_count {
                    errors.push(CsvValidationError::InconsistentColumns {
                        expected: column_count,
                        found: record.len(),
                        row: checked_rows,
                    });
                    break;
                }
            }
            Err(e) => {
                if is_sample_only && is_likely_truncation_error(&e) {
                    break;
                }
                errors.push(CsvValidationError::Parse {
                    message: e.to_string(),
                });
                break;
            }
        }
    }

    if is_sample_only && errors.is_empty() {
        warnings.push(CsvValidationWarning::SampleOnly { checked_rows });
    }

    CsvValidationResult {
        errors,
        warnings,
        file_size_bytes,
        column_count,
        checked_rows,
    }
}

fn is_likely_truncation_error(err: &csv::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("unexpected eof") || msg.contains("premature eof")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
