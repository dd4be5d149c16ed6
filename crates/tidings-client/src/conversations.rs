//! Conversation list screen: every channel, most recent activity first.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use tidings_shared::constants::CHANNELS_CACHE_NAME;
use tidings_shared::{ChannelRecord, Scope};
use tidings_store::{QueryRequest, Snapshot};
use tidings_sync::{SyncEngine, SyncHandle};
use tidings_view::ViewMaterializer;

use crate::config::ClientConfig;
use crate::error::ClientError;

pub struct ConversationsInteractor {
    engine: SyncEngine<ChannelRecord>,
    request: QueryRequest,
}

impl ConversationsInteractor {
    pub(crate) fn new(engine: SyncEngine<ChannelRecord>, config: &ClientConfig) -> Self {
        let request = QueryRequest::new(Scope::All)
            .batch_size(config.fetch_batch_size)
            .cached_as(CHANNELS_CACHE_NAME);
        Self { engine, request }
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    /// Create a channel.  It shows up in the list immediately and is removed
    /// again if the remote refuses it.
    pub async fn create_channel(&self, name: &str) -> Result<ChannelRecord, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::EmptyChannelName);
        }

        let channel = ChannelRecord::new(Uuid::new_v4().to_string(), name);
        self.engine.submit(channel.clone()).await?;

        info!(channel_id = %channel.id, name = %channel.name, "Channel created");
        Ok(channel)
    }

    pub async fn delete_channel(&self, channel_id: &str) -> Result<(), ClientError> {
        self.engine.retract(channel_id.to_string()).await?;
        info!(channel_id = %channel_id, "Channel deleted");
        Ok(())
    }

    /// Whatever the cache holds, for the first paint.
    pub fn fetch_saved_channels(&self) -> Arc<Snapshot<ChannelRecord>> {
        self.engine.fetch_saved(&self.request)
    }

    pub async fn start_channel_sync(&self) -> Result<SyncHandle, ClientError> {
        Ok(self.engine.start(Scope::All).await?)
    }

    /// Live view of the list.
    pub fn materialize(&self) -> Result<ViewMaterializer<ChannelRecord>, ClientError> {
        Ok(ViewMaterializer::new(
            self.engine.store().clone(),
            self.request.clone(),
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use tidings_shared::{ChangeBatch, FeedError, MessageRecord};
    use tidings_store::LocalStore;
    use tidings_sync::{MemoryFeed, SyncError};

    use crate::state::AppState;

    fn app() -> (AppState, Arc<MemoryFeed<ChannelRecord>>) {
        let channels = Arc::new(MemoryFeed::<ChannelRecord>::new());
        let messages = Arc::new(MemoryFeed::<MessageRecord>::new());
        let state = AppState::new(
            ClientConfig::default(),
            LocalStore::open_in_memory().unwrap(),
            channels.clone(),
            messages,
        );
        (state, channels)
    }

    #[tokio::test]
    async fn test_create_channel() {
        let (state, feed) = app();
        let list = state.conversations();

        let created = list.create_channel("  general ").await.unwrap();

        assert_eq!(created.name, "general");
        assert_eq!(feed.submitted(), vec![created.clone()]);
        assert_eq!(list.fetch_saved_channels().records(), &[created]);
    }

    #[tokio::test]
    async fn test_blank_channel_name_is_rejected() {
        let (state, feed) = app();
        let result = state.conversations().create_channel("   ").await;

        assert!(matches!(result, Err(ClientError::EmptyChannelName)));
        assert!(feed.submitted().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_channel_disappears() {
        let (state, feed) = app();
        let list = state.conversations();
        feed.fail_next_submit(FeedError::Rejected("name taken".into()));

        let result = list.create_channel("general").await;

        assert!(matches!(
            result,
            Err(ClientError::Sync(SyncError::SubmitFailed { .. }))
        ));
        assert!(list.fetch_saved_channels().is_empty());
    }

    #[tokio::test]
    async fn test_delete_channel() {
        let (state, _feed) = app();
        let list = state.conversations();
        let keep = list.create_channel("keep").await.unwrap();
        let drop_me = list.create_channel("drop").await.unwrap();

        list.delete_channel(&drop_me.id).await.unwrap();

        assert_eq!(list.fetch_saved_channels().records(), &[keep]);
    }

    #[tokio::test]
    async fn test_sync_fills_the_list() {
        let (state, feed) = app();
        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        feed.seed([ChannelRecord::new("c1", "one").with_activity(Some("hi".into()), at(10))]);

        let list = state.conversations();
        let view = list.materialize().unwrap();
        let (_handle, mut updates) = view.updates();
        let _sync = list.start_channel_sync().await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.snapshot.len(), 1);

        feed.push(ChangeBatch::new().with_added([
            ChannelRecord::new("c2", "two").with_activity(None, at(20)),
        ]))
        .await;
        let second = tokio::time::timeout(Duration::from_secs(5), updates.recv())
            .await
            .unwrap()
            .unwrap();

        let ids: Vec<_> = second.snapshot.records().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["c2", "c1"]);
        assert_eq!(list.fetch_saved_channels().len(), 2);
    }
}
