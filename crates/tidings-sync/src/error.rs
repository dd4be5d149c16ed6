use thiserror::Error;

use tidings_shared::FeedError;
use tidings_store::StoreError;

/// Errors surfaced by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// The remote rejected a user-originated write.  The optimistic local
    /// write has been rolled back; retrying is up to the caller.
    #[error("Submitting {key} failed: {source}")]
    SubmitFailed { key: String, source: FeedError },

    /// The remote rejected a user-originated delete.  The local record has
    /// been restored.
    #[error("Removing {key} failed: {source}")]
    RetractFailed { key: String, source: FeedError },
}
