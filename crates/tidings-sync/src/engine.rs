//! Reconciliation of remote change batches into the local store.
//!
//! One [`SyncEngine`] exists per entity kind.  Feed batches and
//! user-originated writes of that kind take turns on a single async mutex,
//! so a batch never starts before the previous write has committed.  Engines
//! of different kinds share nothing but the [`LocalStore`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tidings_shared::{ChangeBatch, EntityKind, Record, Scope};
use tidings_store::{ChangeSet, LocalStore, QueryRequest, Snapshot, StoreError, StoredRecord};

use crate::error::SyncError;
use crate::feed::{FeedEvent, RemoteFeed};

pub struct SyncEngine<R: StoredRecord> {
    store: LocalStore,
    feed: Arc<dyn RemoteFeed<R>>,
    /// Turn-taking between feed batches and local submits of this kind.
    writes: Arc<AsyncMutex<()>>,
    /// Keys with a local submit or retract awaiting remote confirmation.
    pending: Arc<Mutex<HashMap<R::Key, PendingWrite>>>,
}

/// Bookkeeping for one key with local writes in flight.
#[derive(Debug, Default)]
struct PendingWrite {
    writers: usize,
    /// A feed batch touched the key after the latest local write.
    superseded: bool,
}

impl<R: StoredRecord> Clone for SyncEngine<R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            feed: self.feed.clone(),
            writes: self.writes.clone(),
            pending: self.pending.clone(),
        }
    }
}

/// Running feed subscription.  Stopping (or dropping) the handle ends the
/// worker at its next suspension point; a batch already being written
/// finishes first.
#[must_use = "dropping the handle stops the subscription"]
pub struct SyncHandle {
    kind: EntityKind,
    scope: Scope,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn stop(&self) {
        if !self.task.is_finished() {
            info!(kind = %self.kind, scope = ?self.scope, "stopping feed subscription");
            self.task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<R: StoredRecord> SyncEngine<R> {
    pub fn new(store: LocalStore, feed: Arc<dyn RemoteFeed<R>>) -> Self {
        Self {
            store,
            feed,
            writes: Arc::new(AsyncMutex::new(())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Subscribe to the feed for `scope` and reconcile every delivery, in
    /// order, on a background task.
    pub async fn start(&self, scope: Scope) -> Result<SyncHandle, SyncError> {
        let mut events = self.feed.subscribe(scope.clone()).await?;
        let engine = self.clone();
        let worker_scope = scope.clone();

        let task = tokio::spawn(async move {
            info!(kind = %R::KIND, scope = ?worker_scope, "feed subscription started");
            while let Some(event) = events.recv().await {
                engine.handle_event(event, &worker_scope).await;
            }
            info!(kind = %R::KIND, scope = ?worker_scope, "feed subscription ended");
        });

        Ok(SyncHandle {
            kind: R::KIND,
            scope,
            task,
        })
    }

    /// Apply one batch: upsert `added` and `modified`, then delete `removed`,
    /// all in one store transaction.
    ///
    /// A full-snapshot batch also deletes every stored key of `scope` it
    /// does not list, except keys with a submit still in flight.
    pub async fn reconcile(
        &self,
        batch: ChangeBatch<R>,
        scope: &Scope,
    ) -> Result<ChangeSet<R::Key>, SyncError> {
        batch.validate()?;

        let _turn = self.writes.lock().await;
        let full_snapshot = batch.full_snapshot;
        let (upserts, mut removals) = batch.partition();

        if full_snapshot {
            let listed: HashSet<R::Key> = upserts.iter().map(Record::key).collect();
            let pending = self.pending_keys();
            let stale = self
                .store
                .keys::<R>(scope)?
                .into_iter()
                .filter(|k| !listed.contains(k) && !pending.contains(k));
            removals.extend(stale);
        }

        let changes = self.store.apply(&upserts, &removals)?;
        self.mark_superseded(upserts.iter().map(Record::key).chain(removals.iter().cloned()));

        debug!(
            kind = %R::KIND,
            full_snapshot,
            upserts = upserts.len(),
            removals = removals.len(),
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            removed = changes.removed.len(),
            "batch reconciled"
        );
        Ok(changes)
    }

    /// Cold-start read of whatever is cached.  Never fails: if the store is
    /// unreadable the last cached snapshot (or an empty one) is returned.
    pub fn fetch_saved(&self, request: &QueryRequest) -> Arc<Snapshot<R>> {
        match self.store.query::<R>(request) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(kind = %R::KIND, error = %e, "reading saved records failed, serving cache");
                request
                    .cache_name
                    .as_deref()
                    .and_then(|name| self.store.cached_snapshot::<R>(name))
                    .unwrap_or_else(|| Arc::new(Snapshot::empty()))
            }
        }
    }

    /// Write `record` locally right away, then forward it to the feed.
    ///
    /// If the feed refuses, the local write is undone (the previous version
    /// is restored, or the record deleted if it was new) and
    /// [`SyncError::SubmitFailed`] is returned.  There is no retry.  A
    /// version the feed delivered while the submit was in flight is never
    /// rolled back over.
    pub async fn submit(&self, record: R) -> Result<(), SyncError> {
        record.check_timestamps()?;
        let key = record.key();

        let previous = {
            let _turn = self.writes.lock().await;
            let previous = self.store.get::<R>(&key)?;
            self.mark_pending(&key);
            if let Err(e) = self.store.upsert(std::slice::from_ref(&record)) {
                self.clear_pending(&key);
                return Err(e.into());
            }
            previous
        };

        let sent = self.feed.submit_record(record.clone()).await;

        let _turn = self.writes.lock().await;
        let superseded = self.clear_pending(&key);

        match sent {
            Ok(()) => {
                debug!(kind = %R::KIND, key = %key, "submit confirmed");
                Ok(())
            }
            Err(source) => {
                let current = self.store.get::<R>(&key)?;
                if superseded || current.as_ref() != Some(&record) {
                    warn!(kind = %R::KIND, key = %key, error = %source, "submit rejected, keeping newer remote version");
                } else {
                    warn!(kind = %R::KIND, key = %key, error = %source, "submit rejected, rolling back");
                    let rollback = match previous {
                        Some(previous) => self.store.upsert(&[previous]),
                        None => self.store.delete::<R>(std::slice::from_ref(&key)),
                    };
                    if let Err(e) = rollback {
                        error!(kind = %R::KIND, key = %key, error = %e, "rollback failed");
                        return Err(e.into());
                    }
                }
                Err(SyncError::SubmitFailed {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }

    /// Delete a record locally right away, then ask the feed to delete it.
    /// The record is restored if the feed refuses, unless a feed batch
    /// touched it in the meantime.
    pub async fn retract(&self, key: R::Key) -> Result<(), SyncError> {
        let previous = {
            let _turn = self.writes.lock().await;
            let previous = self.store.get::<R>(&key)?;
            self.mark_pending(&key);
            if let Err(e) = self.store.delete::<R>(std::slice::from_ref(&key)) {
                self.clear_pending(&key);
                return Err(e.into());
            }
            previous
        };

        let sent = self.feed.remove_record(key.clone()).await;

        let _turn = self.writes.lock().await;
        let superseded = self.clear_pending(&key);

        match sent {
            Ok(()) => {
                debug!(kind = %R::KIND, key = %key, "removal confirmed");
                Ok(())
            }
            Err(source) => {
                let current = self.store.get::<R>(&key)?;
                match previous {
                    Some(previous) if !superseded && current.is_none() => {
                        warn!(kind = %R::KIND, key = %key, error = %source, "removal rejected, restoring");
                        self.store.upsert(&[previous])?;
                    }
                    _ => {
                        warn!(kind = %R::KIND, key = %key, error = %source, "removal rejected, keeping remote state");
                    }
                }
                Err(SyncError::RetractFailed {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }

    async fn handle_event(&self, event: FeedEvent<R>, scope: &Scope) {
        let decoded = match event {
            FeedEvent::Batch(batch) => Ok(batch),
            FeedEvent::Frame(bytes) => ChangeBatch::from_bytes(&bytes),
            FeedEvent::Document(doc) => ChangeBatch::from_json(&doc),
            FeedEvent::TransportLost(reason) => {
                warn!(kind = %R::KIND, reason = %reason, "feed transport lost, awaiting resync");
                return;
            }
        };

        let batch = match decoded {
            Ok(batch) => batch,
            Err(e) => {
                warn!(kind = %R::KIND, error = %e, "dropping undecodable batch");
                return;
            }
        };

        let size = batch.len();
        match self.reconcile(batch, scope).await {
            Ok(_) => {}
            Err(SyncError::Feed(e)) => {
                warn!(kind = %R::KIND, size, error = %e, "dropping malformed batch");
            }
            Err(SyncError::Store(StoreError::InvariantViolation(reason))) => {
                error!(kind = %R::KIND, size, reason = %reason, "key invariant violated, batch dropped");
            }
            Err(e) => {
                error!(kind = %R::KIND, size, error = %e, "reconciliation failed, batch dropped");
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<R::Key, PendingWrite>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_pending(&self, key: &R::Key) {
        let mut pending = self.lock_pending();
        let entry = pending.entry(key.clone()).or_default();
        entry.writers += 1;
        entry.superseded = false;
    }

    /// Returns whether a feed batch touched the key since the latest local
    /// write to it.
    fn clear_pending(&self, key: &R::Key) -> bool {
        let mut pending = self.lock_pending();
        let Some(entry) = pending.get_mut(key) else {
            return false;
        };
        let superseded = entry.superseded;
        entry.writers -= 1;
        if entry.writers == 0 {
            pending.remove(key);
        }
        superseded
    }

    fn mark_superseded(&self, keys: impl Iterator<Item = R::Key>) {
        let mut pending = self.lock_pending();
        if pending.is_empty() {
            return;
        }
        for key in keys {
            if let Some(entry) = pending.get_mut(&key) {
                entry.superseded = true;
            }
        }
    }

    fn pending_keys(&self) -> HashSet<R::Key> {
        self.lock_pending().keys().cloned().collect()
    }
}
