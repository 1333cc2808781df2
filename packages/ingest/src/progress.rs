//! Progress reporting for batch ingestion and index rebuilds.
//!
//! The pipeline reports through [`ProgressCallback`] so that the CLI can
//! render `indicatif` bars while library callers and tests stay silent.

use std::sync::Arc;

/// Receives progress updates from a batch operation.
pub trait ProgressCallback: Send + Sync {
    /// Number of files the batch will visit.
    fn set_total(&self, total: u64);

    /// Advance by `delta` files.
    fn inc(&self, delta: u64);

    /// Show what is currently being processed.
    fn set_message(&self, msg: String);

    /// The batch is done; show a summary line.
    fn finish(&self, msg: String);
}

/// Discards every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
}

/// Returns a shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
