//! Services shared by every screen of the client.
//!
//! [`AppState`] owns the local store and exactly one [`SyncEngine`] per
//! entity kind.  Interactors borrow clones of those engines, so every
//! channel write (and every message write) funnels through the same
//! turn-taking lock no matter which screen issued it.

use std::sync::Arc;

use tracing::info;

use tidings_shared::{ChannelRecord, MessageRecord};
use tidings_store::LocalStore;
use tidings_sync::{RemoteFeed, SyncEngine};

use crate::config::ClientConfig;
use crate::conversation::ConversationInteractor;
use crate::conversations::ConversationsInteractor;
use crate::error::ClientError;

pub struct AppState {
    pub config: ClientConfig,
    store: LocalStore,
    channels: SyncEngine<ChannelRecord>,
    messages: SyncEngine<MessageRecord>,
}

impl AppState {
    pub fn new(
        config: ClientConfig,
        store: LocalStore,
        channel_feed: Arc<dyn RemoteFeed<ChannelRecord>>,
        message_feed: Arc<dyn RemoteFeed<MessageRecord>>,
    ) -> Self {
        Self {
            channels: SyncEngine::new(store.clone(), channel_feed),
            messages: SyncEngine::new(store.clone(), message_feed),
            config,
            store,
        }
    }

    /// Open the store named by the config (or the platform default).
    pub fn open(
        config: ClientConfig,
        channel_feed: Arc<dyn RemoteFeed<ChannelRecord>>,
        message_feed: Arc<dyn RemoteFeed<MessageRecord>>,
    ) -> Result<Self, ClientError> {
        let store = match &config.db_path {
            Some(path) => LocalStore::open_at(path)?,
            None => LocalStore::open_default()?,
        };
        info!(sender = %config.sender_id, "client state ready");
        Ok(Self::new(config, store, channel_feed, message_feed))
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Interactor behind the conversation list screen.
    pub fn conversations(&self) -> ConversationsInteractor {
        ConversationsInteractor::new(self.channels.clone(), &self.config)
    }

    /// Interactor behind one open conversation.
    pub fn conversation(&self, channel: &ChannelRecord) -> ConversationInteractor {
        ConversationInteractor::new(self.messages.clone(), channel, &self.config)
    }

    /// Close the store; every later read or write fails fast.
    pub fn shutdown(&self) {
        self.store.close();
    }
}
