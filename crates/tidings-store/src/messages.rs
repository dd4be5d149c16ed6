use rusqlite::{params, Connection, OptionalExtension};

use tidings_shared::{MessageKey, MessageRecord, Scope};

use crate::snapshot::SortOrder;
use crate::subscription::{KindSlot, KindSlots};
use crate::table::{decode_time, encode_time, scope_param, to_sql_count, StoredRecord};

const COLUMNS: &str = "channel_id, id, sender_id, sender_name, text, created_at";

impl StoredRecord for MessageRecord {
    fn slot(slots: &KindSlots) -> &KindSlot<MessageKey> {
        &slots.messages
    }

    fn fetch(conn: &Connection, key: &MessageKey) -> rusqlite::Result<Option<Self>> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM messages WHERE channel_id = ?1 AND id = ?2"),
            params![key.channel_id, key.id],
            row_to_message,
        )
        .optional()
    }

    fn write(conn: &Connection, record: &Self) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO messages (channel_id, id, sender_id, sender_name, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (channel_id, id) DO UPDATE SET
                 sender_id = excluded.sender_id,
                 sender_name = excluded.sender_name,
                 text = excluded.text,
                 created_at = excluded.created_at",
            params![
                record.channel_id,
                record.id,
                record.sender_id,
                record.sender_name,
                record.text,
                encode_time(&record.created_at),
            ],
        )?;
        Ok(())
    }

    fn remove(conn: &Connection, key: &MessageKey) -> rusqlite::Result<bool> {
        let affected = conn.execute(
            "DELETE FROM messages WHERE channel_id = ?1 AND id = ?2",
            params![key.channel_id, key.id],
        )?;
        Ok(affected > 0)
    }

    fn load_page(
        conn: &Connection,
        scope: &Scope,
        sort: SortOrder,
        limit: usize,
        offset: usize,
    ) -> rusqlite::Result<Vec<Self>> {
        let order = match sort {
            SortOrder::Natural => "created_at ASC, id ASC, channel_id ASC",
            SortOrder::Reversed => "created_at DESC, id DESC, channel_id DESC",
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS}
             FROM messages
             WHERE (?1 IS NULL OR channel_id = ?1)
             ORDER BY {order}
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![scope_param(scope), to_sql_count(limit), to_sql_count(offset)],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn load_keys(conn: &Connection, scope: &Scope) -> rusqlite::Result<Vec<MessageKey>> {
        let mut stmt = conn
            .prepare("SELECT channel_id, id FROM messages WHERE (?1 IS NULL OR channel_id = ?1)")?;
        let rows = stmt.query_map(params![scope_param(scope)], |row| {
            Ok(MessageKey {
                channel_id: row.get(0)?,
                id: row.get(1)?,
            })
        })?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    let created_str: String = row.get(5)?;

    Ok(MessageRecord {
        channel_id: row.get(0)?,
        id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_name: row.get(3)?,
        text: row.get(4)?,
        created_at: decode_time(5, &created_str)?,
    })
}
