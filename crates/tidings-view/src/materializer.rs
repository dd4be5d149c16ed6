//! Live, diffed view over one query of the local store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use tidings_store::{ChangeSet, LocalStore, QueryRequest, Snapshot, StoredRecord, SubscriptionHandle};

use crate::diff::{diff_snapshots, UpdateDescription};

/// One materialized change: the new snapshot and how to get there from the
/// previous one.
#[derive(Debug, Clone)]
pub struct ViewUpdate<R: StoredRecord> {
    pub snapshot: Arc<Snapshot<R>>,
    pub description: UpdateDescription,
}

type Handler<R> = Arc<dyn Fn(&ViewUpdate<R>) + Send + Sync>;

struct Registered<R: StoredRecord> {
    active: Arc<AtomicBool>,
    handler: Handler<R>,
}

/// Returned by [`ViewMaterializer::on_update`]; dropping it unregisters the
/// handler.
#[must_use = "dropping the handle unregisters the handler"]
#[derive(Debug)]
pub struct UpdateHandle {
    active: Arc<AtomicBool>,
}

impl UpdateHandle {
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for UpdateHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

struct ViewState<R: StoredRecord> {
    store: LocalStore,
    request: QueryRequest,
    current: Mutex<Arc<Snapshot<R>>>,
    handlers: Mutex<Vec<Registered<R>>>,
}

/// Keeps the snapshot of a [`QueryRequest`] current and tells presenters
/// what changed.
///
/// Every store notification of the kind triggers a full re-query and a
/// positional diff against the previous snapshot.  Handlers run on the
/// thread that committed the write, while that kind's writer fence is held:
/// they may read the store but must not write to it synchronously.
pub struct ViewMaterializer<R: StoredRecord> {
    state: Arc<ViewState<R>>,
    subscription: SubscriptionHandle,
}

impl<R: StoredRecord> ViewMaterializer<R> {
    pub fn new(store: LocalStore, request: QueryRequest) -> tidings_store::Result<Self> {
        let state = Arc::new(ViewState {
            store: store.clone(),
            request,
            current: Mutex::new(Arc::new(Snapshot::empty())),
            handlers: Mutex::new(Vec::new()),
        });

        let weak: Weak<ViewState<R>> = Arc::downgrade(&state);
        let subscription = store.subscribe::<R, _>(move |changes| {
            if let Some(state) = weak.upgrade() {
                state.on_change(changes);
            }
        });

        {
            let mut current = state.lock_current();
            *current = store.query::<R>(&state.request)?;
            debug!(
                kind = %R::KIND,
                scope = ?state.request.scope,
                rows = current.len(),
                sections = current.section_count(),
                "view materialized"
            );
        }

        Ok(Self {
            state,
            subscription,
        })
    }

    pub fn current_snapshot(&self) -> Arc<Snapshot<R>> {
        self.state.lock_current().clone()
    }

    pub fn request(&self) -> &QueryRequest {
        &self.state.request
    }

    pub fn on_update<F>(&self, handler: F) -> UpdateHandle
    where
        F: Fn(&ViewUpdate<R>) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(self.is_open()));
        self.state.lock_handlers().push(Registered {
            active: active.clone(),
            handler: Arc::new(handler),
        });
        UpdateHandle { active }
    }

    /// Updates as an async stream, for consumers living on the runtime.
    pub fn updates(&self) -> (UpdateHandle, mpsc::UnboundedReceiver<ViewUpdate<R>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.on_update(move |update| {
            let _ = tx.send(update.clone());
        });
        (handle, rx)
    }

    /// Stop observing the store.  Safe to call more than once; the last
    /// snapshot stays readable.
    pub fn close(&self) {
        if self.subscription.is_active() {
            self.subscription.unsubscribe();
            for registered in self.state.lock_handlers().drain(..) {
                registered.active.store(false, Ordering::SeqCst);
            }
            debug!(kind = %R::KIND, scope = ?self.state.request.scope, "view closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_active()
    }
}

impl<R: StoredRecord> Drop for ViewMaterializer<R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<R: StoredRecord> ViewState<R> {
    fn on_change(&self, changes: &ChangeSet<R::Key>) {
        if !changes
            .keys()
            .any(|key| R::key_in_scope(key, &self.request.scope))
        {
            trace!(kind = %R::KIND, changes = changes.len(), "change outside view scope");
            return;
        }
        self.refresh();
    }

    fn refresh(&self) {
        let update = {
            let mut current = self.lock_current();
            let next = match self.store.query::<R>(&self.request) {
                Ok(next) => next,
                Err(e) => {
                    warn!(kind = %R::KIND, error = %e, "view refresh failed, keeping previous snapshot");
                    return;
                }
            };
            let description = diff_snapshots(&current, &next);
            *current = next.clone();
            if description.is_empty() {
                return;
            }
            ViewUpdate {
                snapshot: next,
                description,
            }
        };

        debug!(
            kind = %R::KIND,
            sections_inserted = update.description.sections_inserted.len(),
            sections_removed = update.description.sections_removed.len(),
            rows_inserted = update.description.rows_inserted.len(),
            rows_removed = update.description.rows_removed.len(),
            rows_updated = update.description.rows_updated.len(),
            scroll_to_tail = update.description.scroll_to_tail,
            "view updated"
        );

        let handlers: Vec<(Arc<AtomicBool>, Handler<R>)> = {
            let mut handlers = self.lock_handlers();
            handlers.retain(|h| h.active.load(Ordering::SeqCst));
            handlers
                .iter()
                .map(|h| (h.active.clone(), h.handler.clone()))
                .collect()
        };
        for (active, handler) in handlers {
            if active.load(Ordering::SeqCst) {
                handler(&update);
            }
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Arc<Snapshot<R>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_handlers(&self) -> MutexGuard<'_, Vec<Registered<R>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};
    use tidings_shared::{MessageKey, MessageRecord, Scope};
    use tidings_store::{IndexPath, Sectioning};

    const DAY_ONE: i64 = 1_700_000_000;
    const DAY_TWO: i64 = DAY_ONE + 86_400;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn message(channel_id: &str, id: &str, secs: i64) -> MessageRecord {
        MessageRecord {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            sender_id: "u1".to_string(),
            sender_name: "Ana".to_string(),
            text: format!("hello {id}"),
            created_at: at(secs),
        }
    }

    fn conversation(channel_id: &str) -> QueryRequest {
        QueryRequest::new(Scope::Channel(channel_id.to_string()))
            .sectioned(Sectioning::CalendarDay(FixedOffset::east_opt(0).unwrap()))
    }

    fn recorder(
        view: &ViewMaterializer<MessageRecord>,
    ) -> (UpdateHandle, Arc<Mutex<Vec<UpdateDescription>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = view.on_update(move |update| {
            sink.lock().unwrap().push(update.description.clone());
        });
        (handle, seen)
    }

    #[test]
    fn test_empty_view_has_no_sections() {
        let store = LocalStore::open_in_memory().unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store, conversation("c1")).unwrap();

        let snapshot = view.current_snapshot();
        assert_eq!(snapshot.section_count(), 0);
        assert_eq!(snapshot.last_index_path(), None);
    }

    #[test]
    fn test_messages_are_grouped_by_day() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .upsert(&[
                message("c1", "m1", DAY_ONE),
                message("c1", "m2", DAY_ONE + 60),
                message("c1", "m3", DAY_TWO),
            ])
            .unwrap();

        let view = ViewMaterializer::<MessageRecord>::new(store, conversation("c1")).unwrap();
        let snapshot = view.current_snapshot();

        assert_eq!(snapshot.section_count(), 2);
        assert_eq!(snapshot.rows_in_section(0), 2);
        assert_eq!(snapshot.rows_in_section(1), 1);
        assert_eq!(snapshot.last_index_path(), Some(IndexPath::new(1, 0)));
    }

    #[test]
    fn test_append_scrolls_and_edit_does_not() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&[message("c1", "m1", DAY_ONE)]).unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let (_handle, seen) = recorder(&view);

        store.upsert(&[message("c1", "m2", DAY_ONE + 5)]).unwrap();

        let mut edited = message("c1", "m1", DAY_ONE);
        edited.text = "fixed typo".into();
        store.upsert(&[edited]).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].rows_inserted, vec![IndexPath::new(0, 1)]);
        assert!(seen[0].scroll_to_tail);
        assert_eq!(seen[1].rows_updated, vec![IndexPath::new(0, 0)]);
        assert!(!seen[1].scroll_to_tail);
    }

    #[test]
    fn test_new_day_inserts_a_section() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&[message("c1", "m1", DAY_ONE)]).unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let (_handle, seen) = recorder(&view);

        store.upsert(&[message("c1", "m2", DAY_TWO)]).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].sections_inserted, vec![1]);
        assert!(seen[0].rows_inserted.is_empty());
        assert!(seen[0].scroll_to_tail);
    }

    #[test]
    fn test_one_transaction_is_one_update() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .upsert(&[message("c1", "old1", DAY_ONE), message("c1", "old2", DAY_ONE + 1)])
            .unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let (_handle, seen) = recorder(&view);

        let upserts: Vec<_> = (0..5)
            .map(|i| message("c1", &format!("n{i}"), DAY_ONE + 10 + i))
            .collect();
        let deletes = [MessageKey::new("c1", "old1"), MessageKey::new("c1", "old2")];
        store.apply(&upserts, &deletes).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].rows_removed.len(), 2);
        assert_eq!(seen[0].rows_inserted.len(), 5);
        assert_eq!(view.current_snapshot().len(), 5);
    }

    #[test]
    fn test_other_channels_do_not_refresh() {
        let store = LocalStore::open_in_memory().unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let (_handle, seen) = recorder(&view);

        store.upsert(&[message("c2", "m1", DAY_ONE)]).unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert!(view.current_snapshot().is_empty());
    }

    #[test]
    fn test_deleting_the_last_message_removes_its_section() {
        let store = LocalStore::open_in_memory().unwrap();
        store.upsert(&[message("c1", "m1", DAY_ONE)]).unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let (_handle, seen) = recorder(&view);

        store.delete::<MessageRecord>(&[MessageKey::new("c1", "m1")]).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].sections_removed, vec![0]);
        assert!(seen[0].rows_removed.is_empty());
        assert_eq!(view.current_snapshot().section_count(), 0);
    }

    #[test]
    fn test_closed_view_stops_updating() {
        let store = LocalStore::open_in_memory().unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let (handle, seen) = recorder(&view);

        view.close();
        view.close();
        store.upsert(&[message("c1", "m1", DAY_ONE)]).unwrap();

        assert!(!view.is_open());
        assert!(!handle.is_active());
        assert!(seen.lock().unwrap().is_empty());
        assert!(view.current_snapshot().is_empty());
    }

    #[test]
    fn test_close_fences_a_concurrent_writer() {
        let store = LocalStore::open_in_memory().unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let newest = Arc::new(Mutex::new(Vec::<usize>::new()));
        let sink = newest.clone();
        let _handle = view.on_update(move |update| {
            if let Some(last) = update.snapshot.records().last() {
                sink.lock().unwrap().push(last.id[1..].parse().unwrap());
            }
        });

        let closed = Arc::new(AtomicBool::new(false));
        let writer = {
            let (store, closed) = (store.clone(), closed.clone());
            std::thread::spawn(move || {
                // Index of the first commit that started after close returned.
                let mut cutoff = None;
                for i in 0..300usize {
                    if cutoff.is_none() && closed.load(Ordering::SeqCst) {
                        cutoff = Some(i);
                    }
                    let id = format!("m{i:03}");
                    store.upsert(&[message("c1", &id, DAY_ONE + i as i64)]).unwrap();
                }
                cutoff
            })
        };

        while newest.lock().unwrap().len() < 10 {
            std::thread::yield_now();
        }
        view.close();
        closed.store(true, Ordering::SeqCst);
        let cutoff = writer.join().unwrap();

        assert!(!view.is_open());
        if let Some(cutoff) = cutoff {
            for index in newest.lock().unwrap().iter() {
                assert!(*index < cutoff, "m{index:03} delivered after close returned");
            }
        }
        assert_eq!(store.listener_count::<MessageRecord>(), 0);
    }

    #[test]
    fn test_cancelled_handler_is_skipped() {
        let store = LocalStore::open_in_memory().unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let (handle, seen) = recorder(&view);
        let (_other, other_seen) = recorder(&view);

        handle.cancel();
        store.upsert(&[message("c1", "m1", DAY_ONE)]).unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(other_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_updates_arrive_on_the_stream() {
        let store = LocalStore::open_in_memory().unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        let (_handle, mut updates) = view.updates();

        store.upsert(&[message("c1", "m1", DAY_ONE)]).unwrap();

        let update = updates.recv().await.unwrap();
        assert_eq!(update.snapshot.len(), 1);
        assert_eq!(update.description.sections_inserted, vec![0]);
    }

    #[test]
    fn test_dropped_view_releases_its_listener() {
        let store = LocalStore::open_in_memory().unwrap();
        let view = ViewMaterializer::<MessageRecord>::new(store.clone(), conversation("c1")).unwrap();
        drop(view);

        // Commits after the drop find no live view to refresh.
        store.upsert(&[message("c1", "m1", DAY_ONE)]).unwrap();
        assert_eq!(store.listener_count::<MessageRecord>(), 0);
    }
}
