//! Persistence of [`ChannelRecord`]s.

use rusqlite::{params, Connection, OptionalExtension};

use tidings_shared::{ChannelRecord, Scope};

use crate::snapshot::SortOrder;
use crate::subscription::{KindSlot, KindSlots};
use crate::table::{decode_time, encode_time, scope_param, to_sql_count, StoredRecord};

const COLUMNS: &str = "id, name, last_message, last_activity_at";

impl StoredRecord for ChannelRecord {
    fn slot(slots: &KindSlots) -> &KindSlot<String> {
        &slots.channels
    }

    fn fetch(conn: &Connection, key: &String) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM channels WHERE id = ?1"),
            params![key],
            row_to_channel,
        )
        .optional()
    }

    fn write(conn: &Connection, record: &Self) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO channels (id, name, last_message, last_activity_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 last_message = excluded.last_message,
                 last_activity_at = excluded.last_activity_at",
            params![
                record.id,
                record.name,
                record.last_message,
                record.last_activity_at.as_ref().map(encode_time),
            ],
        )?;
        Ok(())
    }

    fn remove(conn: &Connection, key: &String) -> rusqlite::Result<bool> {
        let affected = conn.execute("DELETE FROM channels WHERE id = ?1", params![key])?;
        Ok(affected > 0)
    }

    fn load_page(
        conn: &Connection,
        scope: &Scope,
        sort: SortOrder,
        limit: usize,
        offset: usize,
    ) -> rusqlite::Result<Vec<Self>> {
        // Latest activity first, never-active channels last, then id.
        let order = match sort {
            SortOrder::Natural => {
                "last_activity_at IS NULL ASC, last_activity_at DESC, id ASC"
            }
            SortOrder::Reversed => {
                "last_activity_at IS NULL DESC, last_activity_at ASC, id DESC"
            }
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS}
             FROM channels
             WHERE (?1 IS NULL OR id = ?1)
             ORDER BY {order}
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![scope_param(scope), to_sql_count(limit), to_sql_count(offset)],
            row_to_channel,
        )?;

        let mut channels = Vec::new();
        for row in rows {
            channels.push(row?);
        }
        Ok(channels)
    }

    fn load_keys(conn: &Connection, scope: &Scope) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT id FROM channels WHERE (?1 IS NULL OR id = ?1)")?;
        let rows = stmt.query_map(params![scope_param(scope)], |row| row.get(0))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

/// Map a `rusqlite::Row` to a [`ChannelRecord`].
fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChannelRecord> {
    let last_activity_str: Option<String> = row.get(3)?;

    Ok(ChannelRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        last_message: row.get(2)?,
        last_activity_at: last_activity_str
            .map(|s| decode_time(3, &s))
            .transpose()?,
    })
}
