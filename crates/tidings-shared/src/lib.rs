//! Data model shared by every tidings crate: cached record types, the change
//! batches delivered by the remote feed, and the feed error taxonomy.

pub mod batch;
pub mod constants;
pub mod error;
pub mod types;

pub use batch::ChangeBatch;
pub use error::FeedError;
pub use types::{
    timestamp_in_range, ChannelRecord, EntityKind, MessageKey, MessageRecord, Record, Scope,
};
