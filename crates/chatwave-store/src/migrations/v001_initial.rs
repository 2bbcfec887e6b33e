//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `chats`, `participants` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id               TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    kind             TEXT NOT NULL,               -- 'direct' | 'group'
    direct_key       TEXT UNIQUE,                 -- '<lower>:<higher>' user pair, direct only
    name             TEXT,                        -- groups only
    avatar           TEXT,                        -- groups only
    created_at_us    INTEGER NOT NULL,            -- unix micros
    last_activity_us INTEGER NOT NULL,

    CHECK (kind IN ('direct', 'group')),
    CHECK ((kind = 'direct') = (direct_key IS NOT NULL))
);

-- ----------------------------------------------------------------
-- Participants (chat x user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS participants (
    chat_id      TEXT NOT NULL,                   -- FK -> chats(id)
    user_id      TEXT NOT NULL,
    role         TEXT NOT NULL,                   -- 'admin' | 'member'
    joined_at_us INTEGER NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id            TEXT PRIMARY KEY NOT NULL,      -- UUID v7
    chat_id       TEXT NOT NULL,                  -- FK -> chats(id)
    sender_id     TEXT NOT NULL,
    content       TEXT,
    attachment    TEXT,
    status        INTEGER NOT NULL DEFAULT 0,     -- 0 sent, 1 delivered, 2 read
    created_at_us INTEGER NOT NULL,               -- strictly increasing per chat

    CHECK (content IS NOT NULL OR attachment IS NOT NULL),
    CHECK (status BETWEEN 0 AND 2),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_chat_order
    ON messages(chat_id, created_at_us, id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
