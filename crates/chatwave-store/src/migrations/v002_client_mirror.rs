//! v002 -- Durable mirror of the client chat cache.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS mirror_entries (
    chat_id       TEXT PRIMARY KEY NOT NULL,
    snapshot      TEXT NOT NULL,                  -- JSON-encoded cache entry
    updated_at_us INTEGER NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
