//! Keeps the local store in step with a remote real-time feed.

pub mod engine;
pub mod error;
pub mod feed;
pub mod memory;

pub use engine::{SyncEngine, SyncHandle};
pub use error::SyncError;
pub use feed::{FeedEvent, RemoteFeed};
pub use memory::MemoryFeed;
