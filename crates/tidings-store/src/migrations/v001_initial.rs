//! v001 -- Initial schema creation.
//!
//! Creates the `channels` and `messages` cache tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
///
/// Timestamps are RFC 3339 strings (nanoseconds, `Z` suffix).  Writes with
/// years outside 0001 to 9999 are refused, so every stored value has the
/// same width and lexical order is chronological order.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id               TEXT PRIMARY KEY NOT NULL,
    name             TEXT NOT NULL,
    last_message     TEXT,
    last_activity_at TEXT                        -- nullable, sorts last
);

CREATE INDEX IF NOT EXISTS idx_channels_activity
    ON channels(last_activity_at DESC, id ASC);

-- ----------------------------------------------------------------
-- Messages
--
-- No foreign key to channels: the two kinds sync independently and a
-- message may arrive before its channel record.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    channel_id  TEXT NOT NULL,
    id          TEXT NOT NULL,
    sender_id   TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    text        TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    PRIMARY KEY (channel_id, id)
);

CREATE INDEX IF NOT EXISTS idx_messages_channel_created
    ON messages(channel_id, created_at ASC, id ASC);

CREATE INDEX IF NOT EXISTS idx_messages_created
    ON messages(created_at ASC, id ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
