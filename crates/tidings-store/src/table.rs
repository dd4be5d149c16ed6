//! Mapping between record types and their SQLite tables.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use tidings_shared::{Record, Scope};

use crate::snapshot::SortOrder;
use crate::subscription::{KindSlot, KindSlots};

/// A [`Record`] the local store knows how to persist.
///
/// Implementations only issue single statements; the store wraps them in a
/// transaction.
pub trait StoredRecord: Record {
    /// The writer fence and listener list of this kind.
    fn slot(slots: &KindSlots) -> &KindSlot<Self::Key>;

    fn fetch(conn: &Connection, key: &Self::Key) -> rusqlite::Result<Option<Self>>;

    /// Insert or fully overwrite the row with this record's key.
    fn write(conn: &Connection, record: &Self) -> rusqlite::Result<()>;

    /// Returns `true` if a row was deleted.
    fn remove(conn: &Connection, key: &Self::Key) -> rusqlite::Result<bool>;

    /// One page of the scope in display order (or its reverse).
    fn load_page(
        conn: &Connection,
        scope: &Scope,
        sort: SortOrder,
        limit: usize,
        offset: usize,
    ) -> rusqlite::Result<Vec<Self>>;

    fn load_keys(conn: &Connection, scope: &Scope) -> rusqlite::Result<Vec<Self::Key>>;
}

/// Channel filter parameter: `None` matches every row.
pub(crate) fn scope_param(scope: &Scope) -> Option<&str> {
    match scope {
        Scope::All => None,
        Scope::Channel(id) => Some(id.as_str()),
    }
}

/// RFC 3339 with nanoseconds.  Fixed width, so text order equals time order,
/// only for years 0001 to 9999; the store rejects anything else before
/// writing.
pub(crate) fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_time(column: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
