//! # tidings-store
//!
//! Local persistent cache of channels and messages, backed by SQLite.
//!
//! [`LocalStore`] wraps a single [`Database`] connection and offers
//! transactional upsert/delete, ordered and sectioned snapshot queries, and
//! per-kind change subscriptions that fire once per committed transaction.

pub mod channels;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod snapshot;

mod changes;
mod error;
mod store;
mod subscription;
mod table;

pub use changes::ChangeSet;
pub use database::Database;
pub use error::{Result, StoreError};
pub use snapshot::{IndexPath, QueryRequest, Section, SectionKey, Sectioning, Snapshot, SortOrder};
pub use store::LocalStore;
pub use subscription::{KindSlot, KindSlots, SubscriptionHandle};
pub use table::StoredRecord;
