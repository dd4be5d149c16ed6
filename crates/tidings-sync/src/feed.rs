//! Contract of the remote real-time data source.

use async_trait::async_trait;
use tokio::sync::mpsc;

use tidings_shared::{ChangeBatch, FeedError, Record, Scope};

/// Deliveries on a feed subscription.
#[derive(Debug, Clone)]
pub enum FeedEvent<R: Record> {
    /// An already decoded batch.
    Batch(ChangeBatch<R>),
    /// A binary (bincode) batch frame, decoded by the engine.
    Frame(Vec<u8>),
    /// A JSON batch document, decoded by the engine.
    Document(String),
    /// The connection dropped.  The feed reconnects on its own and then
    /// delivers a full-snapshot batch.
    TransportLost(String),
}

/// Authoritative remote source of one record kind.
///
/// Subscriptions use the same bounded-channel shape as the rest of the
/// async plumbing: the feed owns the sender, the engine drains the receiver.
/// The first delivery of a subscription is a full-snapshot batch.
#[async_trait]
pub trait RemoteFeed<R: Record>: Send + Sync {
    async fn subscribe(&self, scope: Scope) -> Result<mpsc::Receiver<FeedEvent<R>>, FeedError>;

    /// Create or overwrite a record remotely.
    async fn submit_record(&self, record: R) -> Result<(), FeedError>;

    /// Delete a record remotely.
    async fn remove_record(&self, key: R::Key) -> Result<(), FeedError>;
}
