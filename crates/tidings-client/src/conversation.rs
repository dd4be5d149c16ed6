//! One open conversation: the messages of a single channel, grouped by day.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use tidings_shared::constants::{MAX_MESSAGE_SIZE, MESSAGES_CACHE_NAME};
use tidings_shared::{ChannelRecord, MessageRecord, Scope};
use tidings_store::{IndexPath, QueryRequest, Sectioning, Snapshot};
use tidings_sync::{SyncEngine, SyncHandle};
use tidings_view::ViewMaterializer;

use crate::config::ClientConfig;
use crate::error::ClientError;

pub struct ConversationInteractor {
    engine: SyncEngine<MessageRecord>,
    channel_id: String,
    channel_title: String,
    sender_id: String,
    sender_name: String,
    request: QueryRequest,
}

impl ConversationInteractor {
    pub(crate) fn new(
        engine: SyncEngine<MessageRecord>,
        channel: &ChannelRecord,
        config: &ClientConfig,
    ) -> Self {
        let request = QueryRequest::new(Scope::Channel(channel.id.clone()))
            .sectioned(Sectioning::CalendarDay(config.utc_offset))
            .batch_size(config.fetch_batch_size)
            .cached_as(format!("{MESSAGES_CACHE_NAME}/{}", channel.id));

        Self {
            engine,
            channel_id: channel.id.clone(),
            channel_title: channel.name.clone(),
            sender_id: config.sender_id.clone(),
            sender_name: config.sender_name.clone(),
            request,
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn channel_title(&self) -> &str {
        &self.channel_title
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    /// Whether `message` was sent from this client's identity.
    pub fn is_own(&self, message: &MessageRecord) -> bool {
        message.sender_id == self.sender_id
    }

    pub fn fetch_saved_messages(&self) -> Arc<Snapshot<MessageRecord>> {
        self.engine.fetch_saved(&self.request)
    }

    pub async fn start_message_sync(&self) -> Result<SyncHandle, ClientError> {
        Ok(self.engine.start(Scope::Channel(self.channel_id.clone())).await?)
    }

    pub fn materialize(&self) -> Result<ViewMaterializer<MessageRecord>, ClientError> {
        Ok(ViewMaterializer::new(
            self.engine.store().clone(),
            self.request.clone(),
        )?)
    }

    /// Post `text` to the channel.  The message is visible locally before
    /// the remote answers and rolled back if it refuses.
    pub async fn send_message(&self, text: &str) -> Result<MessageRecord, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ClientError::MessageTooLarge {
                size: text.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let message = MessageRecord {
            id: Uuid::new_v4().to_string(),
            channel_id: self.channel_id.clone(),
            sender_id: self.sender_id.clone(),
            sender_name: self.sender_name.clone(),
            text: text.to_string(),
            created_at: Utc::now(),
        };
        debug!(msg_id = %message.id, channel = %self.channel_id, "Sending message");

        self.engine.submit(message.clone()).await?;

        info!(msg_id = %message.id, channel = %self.channel_id, "Message sent");
        Ok(message)
    }
}

/// Row the conversation screen scrolls to: the newest message.
pub fn scroll_target(snapshot: &Snapshot<MessageRecord>) -> Option<IndexPath> {
    snapshot.last_index_path()
}
