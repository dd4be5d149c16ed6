//! In-process [`RemoteFeed`] used by tests and the demo client.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

use tidings_shared::constants::FEED_CHANNEL_CAPACITY;
use tidings_shared::{ChangeBatch, FeedError, Record, Scope};

use crate::feed::{FeedEvent, RemoteFeed};

struct Subscriber<R: Record> {
    scope: Scope,
    tx: mpsc::Sender<FeedEvent<R>>,
}

struct FeedState<R: Record> {
    records: BTreeMap<R::Key, R>,
    subscribers: Vec<Subscriber<R>>,
    failures: VecDeque<FeedError>,
    submitted: Vec<R>,
}

/// A remote feed living in memory.
///
/// It keeps the authoritative record set, fans batches out to subscribers
/// (filtered to each subscriber's scope) and, unless built
/// [`without_echo`](MemoryFeed::without_echo), echoes accepted writes back as
/// batches the way a real-time backend does.
///
/// Deliveries never overtake each other: each subscriber sees batches in
/// the order they were applied to the remote state.
pub struct MemoryFeed<R: Record> {
    state: Mutex<FeedState<R>>,
    /// Held from a state change until its delivery has been queued.
    delivery: AsyncMutex<()>,
    echo: bool,
}

impl<R: Record> MemoryFeed<R> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FeedState {
                records: BTreeMap::new(),
                subscribers: Vec::new(),
                failures: VecDeque::new(),
                submitted: Vec::new(),
            }),
            delivery: AsyncMutex::new(()),
            echo: true,
        }
    }

    /// Accept writes silently instead of echoing them to subscribers.
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Replace the remote state without notifying anyone.
    pub fn seed(&self, records: impl IntoIterator<Item = R>) {
        let mut state = self.lock();
        state.records = records.into_iter().map(|r| (r.key(), r)).collect();
    }

    /// Apply a batch to the remote state and deliver it to every subscriber
    /// whose scope it touches.
    pub async fn push(&self, batch: ChangeBatch<R>) {
        let _order = self.delivery.lock().await;
        let deliveries = {
            let mut state = self.lock();
            if batch.full_snapshot {
                state.records.clear();
            }
            for record in batch.added.iter().chain(batch.modified.iter()) {
                state.records.insert(record.key(), record.clone());
            }
            for key in &batch.removed {
                state.records.remove(key);
            }

            state
                .subscribers
                .iter()
                .filter_map(|s| {
                    scoped(&batch, &s.scope).map(|b| (s.tx.clone(), FeedEvent::Batch(b)))
                })
                .collect::<Vec<_>>()
        };
        self.deliver(deliveries).await;
    }

    /// Deliver a raw event to every subscriber, bypassing the remote state.
    pub async fn push_event(&self, event: FeedEvent<R>) {
        let _order = self.delivery.lock().await;
        let deliveries = {
            let state = self.lock();
            state
                .subscribers
                .iter()
                .map(|s| (s.tx.clone(), event.clone()))
                .collect::<Vec<_>>()
        };
        self.deliver(deliveries).await;
    }

    /// Simulate a dropped connection followed by a reconnect: every
    /// subscriber sees a transport error, then a full snapshot of its scope.
    pub async fn reconnect(&self) {
        let _order = self.delivery.lock().await;
        let (lost, snapshots): (Vec<_>, Vec<_>) = {
            let state = self.lock();
            state
                .subscribers
                .iter()
                .map(|s| {
                    let reason = FeedEvent::TransportLost("connection reset".to_string());
                    let snapshot = FeedEvent::Batch(snapshot_of(&state.records, &s.scope));
                    ((s.tx.clone(), reason), (s.tx.clone(), snapshot))
                })
                .unzip()
        };
        self.deliver(lost).await;
        self.deliver(snapshots).await;
    }

    /// Make the next `submit_record` or `remove_record` call fail.
    pub fn fail_next_submit(&self, error: FeedError) {
        self.lock().failures.push_back(error);
    }

    /// Every record accepted through `submit_record`, in order.
    pub fn submitted(&self) -> Vec<R> {
        self.lock().submitted.clone()
    }

    pub fn remote_records(&self) -> Vec<R> {
        self.lock().records.values().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    async fn deliver(&self, deliveries: Vec<(mpsc::Sender<FeedEvent<R>>, FeedEvent<R>)>) {
        let sends = deliveries
            .into_iter()
            .map(|(tx, event)| async move { tx.send(event).await.is_ok() });
        let delivered = join_all(sends).await;

        if delivered.iter().any(|ok| !ok) {
            debug!("pruning closed feed subscribers");
            self.lock().subscribers.retain(|s| !s.tx.is_closed());
        }
    }

    fn take_failure(&self) -> Option<FeedError> {
        self.lock().failures.pop_front()
    }

    fn lock(&self) -> MutexGuard<'_, FeedState<R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R: Record> Default for MemoryFeed<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Record> RemoteFeed<R> for MemoryFeed<R> {
    async fn subscribe(&self, scope: Scope) -> Result<mpsc::Receiver<FeedEvent<R>>, FeedError> {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let _order = self.delivery.lock().await;
        let mut state = self.lock();

        let initial = snapshot_of(&state.records, &scope);
        tx.try_send(FeedEvent::Batch(initial))
            .map_err(|e| FeedError::Transport(e.to_string()))?;

        debug!(kind = %R::KIND, scope = ?scope, "memory feed subscription opened");
        state.subscribers.push(Subscriber { scope, tx });
        Ok(rx)
    }

    async fn submit_record(&self, record: R) -> Result<(), FeedError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        let existed = {
            let mut state = self.lock();
            state.submitted.push(record.clone());
            state.records.contains_key(&record.key())
        };

        let batch = if existed {
            ChangeBatch::new().with_modified([record])
        } else {
            ChangeBatch::new().with_added([record])
        };
        if self.echo {
            self.push(batch).await;
        } else {
            let (upserts, _) = batch.partition();
            let mut state = self.lock();
            for record in upserts {
                state.records.insert(record.key(), record);
            }
        }
        Ok(())
    }

    async fn remove_record(&self, key: R::Key) -> Result<(), FeedError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        if self.echo {
            self.push(ChangeBatch::new().with_removed([key])).await;
        } else {
            self.lock().records.remove(&key);
        }
        Ok(())
    }
}

/// The part of `batch` inside `scope`, or `None` if nothing is left.
fn scoped<R: Record>(batch: &ChangeBatch<R>, scope: &Scope) -> Option<ChangeBatch<R>> {
    let filtered = ChangeBatch {
        added: batch.added.iter().filter(|r| r.in_scope(scope)).cloned().collect(),
        modified: batch.modified.iter().filter(|r| r.in_scope(scope)).cloned().collect(),
        removed: batch
            .removed
            .iter()
            .filter(|k| R::key_in_scope(k, scope))
            .cloned()
            .collect(),
        full_snapshot: batch.full_snapshot,
    };

    if filtered.is_empty() && !filtered.full_snapshot {
        None
    } else {
        Some(filtered)
    }
}

fn snapshot_of<R: Record>(records: &BTreeMap<R::Key, R>, scope: &Scope) -> ChangeBatch<R> {
    ChangeBatch::snapshot(records.values().filter(|r| r.in_scope(scope)).cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tidings_shared::ChannelRecord;

    #[tokio::test]
    async fn test_subscription_starts_with_a_snapshot() {
        let feed = MemoryFeed::<ChannelRecord>::new();
        feed.seed([ChannelRecord::new("c1", "general")]);

        let mut rx = feed.subscribe(Scope::All).await.unwrap();
        match rx.recv().await {
            Some(FeedEvent::Batch(batch)) => {
                assert!(batch.full_snapshot);
                assert_eq!(batch.added.len(), 1);
            }
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_batches_are_filtered_by_scope() {
        let feed = MemoryFeed::<ChannelRecord>::new();
        let mut only_c2 = feed.subscribe(Scope::Channel("c2".into())).await.unwrap();
        let _ = only_c2.recv().await;

        feed.push(ChangeBatch::new().with_added([ChannelRecord::new("c1", "one")]))
            .await;
        feed.push(ChangeBatch::new().with_added([ChannelRecord::new("c2", "two")]))
            .await;

        match only_c2.recv().await {
            Some(FeedEvent::Batch(batch)) => assert_eq!(batch.added[0].id, "c2"),
            other => panic!("unexpected delivery: {other:?}"),
        }
        assert_eq!(feed.remote_records().len(), 2);
    }

    #[tokio::test]
    async fn test_queued_failure_rejects_one_submit() {
        let feed = MemoryFeed::<ChannelRecord>::new().without_echo();
        feed.fail_next_submit(FeedError::Rejected("quota".into()));

        let first = feed.submit_record(ChannelRecord::new("c1", "x")).await;
        let second = feed.submit_record(ChannelRecord::new("c1", "x")).await;

        assert_eq!(first, Err(FeedError::Rejected("quota".into())));
        assert!(second.is_ok());
        assert_eq!(feed.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_dropped_receivers_are_pruned() {
        let feed = MemoryFeed::<ChannelRecord>::new();
        let rx = feed.subscribe(Scope::All).await.unwrap();
        assert_eq!(feed.subscriber_count(), 1);
        drop(rx);
        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_pushes_arrive_in_apply_order() {
        let feed = Arc::new(MemoryFeed::<ChannelRecord>::new());
        let mut rx = feed.subscribe(Scope::All).await.unwrap();
        let _ = rx.recv().await;

        let pushes: Vec<_> = (0..50)
            .map(|i| {
                let feed = feed.clone();
                tokio::spawn(async move {
                    let version = ChannelRecord::new("c1", format!("v{i}"));
                    feed.push(ChangeBatch::new().with_modified([version])).await;
                })
            })
            .collect();
        for push in pushes {
            push.await.unwrap();
        }

        let mut last = None;
        for _ in 0..50 {
            match rx.recv().await {
                Some(FeedEvent::Batch(batch)) => last = batch.modified.into_iter().next(),
                other => panic!("unexpected delivery: {other:?}"),
            }
        }
        assert_eq!(last, feed.remote_records().into_iter().next());
    }
}
