//! Transfer scheduler for bounded parallelism.
//!
//! Limits the number of file transfers that batch operations run at the
//! same time. All clones of a `CybozuClient` share one scheduler, so the
//! limit holds across concurrent batches too.
//!
//! # Usage
//!
//! ```ignore
//! let scheduler = TransferScheduler::new(10);
//!
//! // Acquire a permit (waits if all slots are taken)
//! let permit = scheduler.acquire().await?;
//!
//! // Transfer while holding the permit...
//!
//! // Permit is automatically released when dropped
//! drop(permit);
//! ```

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// TransferScheduler
// ─────────────────────────────────────────────────────────────────────────────

/// Scheduler that limits the number of concurrent transfers.
#[derive(Clone)]
pub struct TransferScheduler {
    sem: Arc<Semaphore>,
    max: usize,
}

impl TransferScheduler {
    /// Creates a new scheduler with the specified maximum concurrent transfers.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is 0. `ClientConfig::validate` rejects that
    /// value before a client is built.
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be greater than 0");

        Self {
            sem: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
        }
    }

    /// Acquires a permit, waiting if all slots are currently in use.
    pub async fn acquire(&self) -> Result<TransferPermit, AppError> {
        let permit = self
            .sem
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AppError::Internal("Transfer scheduler closed".to_string()))?;

        Ok(TransferPermit { _permit: permit })
    }

    /// Number of transfers currently holding a slot.
    pub fn active_transfers(&self) -> usize {
        self.max - self.sem.available_permits()
    }

    /// The configured limit.
    pub fn max_concurrent(&self) -> usize {
        self.max
    }
}

/// A held transfer slot; released on drop.
pub struct TransferPermit {
    _permit: OwnedSemaphorePermit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
