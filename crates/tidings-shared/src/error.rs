use thiserror::Error;

/// Failures reported by, or while talking to, the remote feed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// A change batch could not be decoded or broke the batch invariants.
    #[error("Malformed change batch: {0}")]
    Decode(String),

    /// The feed is unreachable.  Reconnecting is the feed's own business.
    #[error("Feed transport error: {0}")]
    Transport(String),

    /// The remote side refused a user-originated write.
    #[error("Remote rejected the write: {0}")]
    Rejected(String),

    /// The subscription or feed has shut down.
    #[error("Feed closed")]
    Closed,
}

impl From<bincode::Error> for FeedError {
    fn from(e: bincode::Error) -> Self {
        FeedError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Decode(e.to_string())
    }
}
