//! The shared, transactional record cache.

use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tidings_shared::Scope;

use crate::changes::{ChangeSet, NetChanges};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::snapshot::{QueryRequest, SortOrder, Snapshot};
use crate::subscription::{KindSlots, SubscriptionHandle};
use crate::table::StoredRecord;

type CachedSnapshot = Arc<dyn Any + Send + Sync>;

struct Inner {
    /// `None` once the store has been closed.
    db: Mutex<Option<Database>>,
    slots: KindSlots,
    snapshots: Mutex<HashMap<String, CachedSnapshot>>,
}

/// Cheaply clonable handle to the local cache.
///
/// Every mutation runs in a single SQLite transaction.  Listeners registered
/// through [`LocalStore::subscribe`] are called once per committed
/// transaction, in commit order, before the write call returns.  Listeners
/// may query the store but must not write to the kind they observe from
/// inside the callback.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

impl LocalStore {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Inner {
                db: Mutex::new(Some(db)),
                slots: KindSlots::new(),
                snapshots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Database::open_default()?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert unseen keys and overwrite existing ones, atomically.
    pub fn upsert<R: StoredRecord>(&self, records: &[R]) -> Result<ChangeSet<R::Key>> {
        self.apply(records, &[])
    }

    /// Remove the given keys.  Unknown keys are ignored.
    pub fn delete<R: StoredRecord>(&self, keys: &[R::Key]) -> Result<ChangeSet<R::Key>> {
        self.apply::<R>(&[], keys)
    }

    /// Upsert then delete inside one transaction, producing one notification.
    ///
    /// Upserts identical to the stored row and deletes of unknown keys are
    /// not part of the net change; a transaction with no net change notifies
    /// nobody.
    pub fn apply<R: StoredRecord>(
        &self,
        upserts: &[R],
        deletes: &[R::Key],
    ) -> Result<ChangeSet<R::Key>> {
        for record in upserts {
            record
                .check_timestamps()
                .map_err(|e| StoreError::Unstorable(e.to_string()))?;
        }

        let slot = R::slot(&self.inner.slots);
        let _writer = slot.lock_writer();

        let changes = {
            let mut guard = self.lock_db()?;
            let db = guard.as_mut().ok_or(StoreError::Unavailable)?;
            let tx = db.conn_mut().transaction()?;
            let mut net = NetChanges::new();

            for record in upserts {
                let key = record.key();
                match R::fetch(&tx, &key)? {
                    Some(existing) if existing == *record => {}
                    Some(_) => {
                        R::write(&tx, record)?;
                        net.row_changed(key);
                    }
                    None => {
                        R::write(&tx, record)?;
                        net.row_created(key);
                    }
                }
            }

            for key in deletes {
                if R::remove(&tx, key)? {
                    net.row_deleted(key.clone());
                }
            }

            tx.commit()?;
            net.into_change_set(R::KIND)
        };

        tracing::debug!(
            kind = %R::KIND,
            inserted = changes.inserted.len(),
            updated = changes.updated.len(),
            removed = changes.removed.len(),
            "committed write transaction"
        );

        if !changes.is_empty() {
            slot.deliver(&changes);
        }
        Ok(changes)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get<R: StoredRecord>(&self, key: &R::Key) -> Result<Option<R>> {
        let guard = self.lock_db()?;
        let db = guard.as_ref().ok_or(StoreError::Unavailable)?;
        Ok(R::fetch(db.conn(), key)?)
    }

    /// Keys of every stored record of the kind inside `scope`.
    pub fn keys<R: StoredRecord>(&self, scope: &Scope) -> Result<Vec<R::Key>> {
        let guard = self.lock_db()?;
        let db = guard.as_ref().ok_or(StoreError::Unavailable)?;
        Ok(R::load_keys(db.conn(), scope)?)
    }

    /// Read the whole scope into a snapshot, `batch_size` rows per page.
    ///
    /// On failure the previous snapshot cached under the request's
    /// `cache_name` (if any) stays available via
    /// [`LocalStore::cached_snapshot`].
    pub fn query<R: StoredRecord>(&self, request: &QueryRequest) -> Result<Arc<Snapshot<R>>> {
        let records = {
            let guard = self.lock_db()?;
            let db = guard.as_ref().ok_or(StoreError::Unavailable)?;
            let page_size = request.batch_size.max(1);

            // Pages are always read in natural order; reversing at the end
            // keeps page boundaries stable.
            let mut records = Vec::new();
            loop {
                let page = R::load_page(
                    db.conn(),
                    &request.scope,
                    SortOrder::Natural,
                    page_size,
                    records.len(),
                )?;
                let done = page.len() < page_size;
                records.extend(page);
                if done {
                    break;
                }
            }
            debug_assert!(
                records.windows(2).all(|w| w[0].display_cmp(&w[1]).is_lt()),
                "{} rows read out of display order",
                R::KIND
            );
            records
        };

        let mut records = records;
        if request.sort == SortOrder::Reversed {
            records.reverse();
        }

        let snapshot = Arc::new(Snapshot::build(records, request.sections));

        if let Some(name) = &request.cache_name {
            self.lock_snapshots()
                .insert(name.clone(), snapshot.clone() as CachedSnapshot);
        }

        Ok(snapshot)
    }

    /// Read a single page of `request.batch_size` rows.
    pub fn query_page<R: StoredRecord>(&self, request: &QueryRequest, page: usize) -> Result<Vec<R>> {
        let guard = self.lock_db()?;
        let db = guard.as_ref().ok_or(StoreError::Unavailable)?;
        let page_size = request.batch_size.max(1);
        Ok(R::load_page(
            db.conn(),
            &request.scope,
            request.sort,
            page_size,
            page.saturating_mul(page_size),
        )?)
    }

    /// Last successful snapshot stored under `name` by [`LocalStore::query`].
    pub fn cached_snapshot<R: StoredRecord>(&self, name: &str) -> Option<Arc<Snapshot<R>>> {
        let cached = self.lock_snapshots().get(name).cloned()?;
        cached.downcast::<Snapshot<R>>().ok()
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Register a listener for committed changes of kind `R`.
    pub fn subscribe<R, F>(&self, on_change: F) -> SubscriptionHandle
    where
        R: StoredRecord,
        F: Fn(&ChangeSet<R::Key>) + Send + Sync + 'static,
    {
        R::slot(&self.inner.slots).subscribe(on_change)
    }

    pub fn listener_count<R: StoredRecord>(&self) -> usize {
        R::slot(&self.inner.slots).listener_count()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Close the underlying connection.  Every later read or write fails
    /// with [`StoreError::Unavailable`]; cached snapshots stay readable.
    pub fn close(&self) {
        if let Ok(mut guard) = self.lock_db() {
            if guard.take().is_some() {
                tracing::info!("local store closed");
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.lock_db().map(|g| g.is_some()).unwrap_or(false)
    }

    fn lock_db(&self) -> Result<MutexGuard<'_, Option<Database>>> {
        self.inner.db.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn lock_snapshots(&self) -> MutexGuard<'_, HashMap<String, CachedSnapshot>> {
        self.inner
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
