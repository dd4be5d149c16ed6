//! # tidings-demo
//!
//! Runs both screens of the client against in-process feeds and prints what
//! a list presenter would render, as JSON.  Point `TIDINGS_DB_PATH` at a
//! file to keep the cache between runs; without it everything stays in
//! memory.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as TimeDelta, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use tidings_client::presenter::{channel_rows, message_sections};
use tidings_client::{scroll_target, AppState, ClientConfig};
use tidings_shared::{ChangeBatch, ChannelRecord, MessageRecord};
use tidings_store::{LocalStore, StoredRecord};
use tidings_sync::MemoryFeed;
use tidings_view::ViewUpdate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    tidings_client::init_tracing();

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 2. Remote side, seeded with a couple of channels
    // -----------------------------------------------------------------------
    let now = Utc::now();
    let channel_feed = Arc::new(MemoryFeed::<ChannelRecord>::new());
    let message_feed = Arc::new(MemoryFeed::<MessageRecord>::new());
    channel_feed.seed([
        ChannelRecord::new("general", "General")
            .with_activity(Some("Welcome!".into()), now - TimeDelta::days(2)),
        ChannelRecord::new("random", "Random"),
    ]);
    message_feed.seed([MessageRecord {
        id: "welcome".into(),
        channel_id: "general".into(),
        sender_id: "admin".into(),
        sender_name: "Admin".into(),
        text: "Welcome!".into(),
        created_at: now - TimeDelta::days(2),
    }]);

    // -----------------------------------------------------------------------
    // 3. Local state
    // -----------------------------------------------------------------------
    let state = match config.db_path {
        Some(_) => AppState::open(config.clone(), channel_feed.clone(), message_feed.clone())?,
        None => AppState::new(
            config.clone(),
            LocalStore::open_in_memory()?,
            channel_feed.clone(),
            message_feed.clone(),
        ),
    };

    // -----------------------------------------------------------------------
    // 4. Conversation list
    // -----------------------------------------------------------------------
    let list = state.conversations();
    info!(cached = list.fetch_saved_channels().len(), "Saved channels");

    let list_view = list.materialize()?;
    let (_list_handle, mut list_updates) = list_view.updates();
    let _channel_sync = list.start_channel_sync().await?;

    let created = list.create_channel("Demo").await?;
    channel_feed
        .push(ChangeBatch::new().with_modified([ChannelRecord::new("random", "Random")
            .with_activity(Some("anyone here?".into()), Utc::now())]))
        .await;

    if let Some(update) = settle(&mut list_updates).await {
        let rows = channel_rows(&update.snapshot, Utc::now(), config.utc_offset);
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }

    // -----------------------------------------------------------------------
    // 5. One conversation
    // -----------------------------------------------------------------------
    let general = list
        .fetch_saved_channels()
        .records()
        .iter()
        .find(|c| c.id == "general")
        .cloned()
        .unwrap_or_else(|| created.clone());
    let chat = state.conversation(&general);
    info!(title = %chat.channel_title(), "Opened conversation");

    let chat_view = chat.materialize()?;
    let (_chat_handle, mut chat_updates) = chat_view.updates();
    let _message_sync = chat.start_message_sync().await?;

    chat.send_message("Hello from the demo").await?;
    message_feed
        .push(ChangeBatch::new().with_added([MessageRecord {
            id: "reply".into(),
            channel_id: general.id.clone(),
            sender_id: "ana".into(),
            sender_name: "Ana".into(),
            text: "Hi there".into(),
            created_at: Utc::now(),
        }]))
        .await;

    if let Some(update) = settle(&mut chat_updates).await {
        info!(
            scroll_to_tail = update.description.scroll_to_tail,
            target = ?scroll_target(&update.snapshot),
            "Conversation updated"
        );
        let sections = message_sections(&update.snapshot, &config.sender_id, config.utc_offset);
        println!("{}", serde_json::to_string_pretty(&sections)?);
    }

    // -----------------------------------------------------------------------
    // 6. Shutdown
    // -----------------------------------------------------------------------
    list_view.close();
    chat_view.close();
    state.shutdown();
    info!("Demo finished");
    Ok(())
}

/// Wait until updates stop arriving and return the last one.
async fn settle<R: StoredRecord>(updates: &mut UnboundedReceiver<ViewUpdate<R>>) -> Option<ViewUpdate<R>> {
    let mut last = None;
    while let Ok(Some(update)) = tokio::time::timeout(Duration::from_millis(200), updates.recv()).await {
        last = Some(update);
    }
    last
}
