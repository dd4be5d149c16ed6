use thiserror::Error;

use tidings_store::StoreError;
use tidings_sync::SyncError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Channel name must not be empty")]
    EmptyChannelName,

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}
