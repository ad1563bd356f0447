//! v001 -- Initial schema creation.
//!
//! Creates the eight core tables: `users`, `groups`, `group_members`,
//! `messages`, `message_targets`, `files`, `file_uploads`, `file_targets`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    user_id       TEXT PRIMARY KEY NOT NULL,
    nickname      TEXT NOT NULL,
    password_hash TEXT NOT NULL,               -- opaque PHC string
    created_at    INTEGER NOT NULL             -- seconds since epoch
);

-- ----------------------------------------------------------------
-- Groups and membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS groups (
    group_id   TEXT PRIMARY KEY NOT NULL,      -- 128-bit hex
    name       TEXT NOT NULL,
    owner_id   TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id  TEXT NOT NULL,
    user_id   TEXT NOT NULL,
    role      TEXT NOT NULL,                   -- owner | admin | member
    joined_at INTEGER NOT NULL,
    PRIMARY KEY (group_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Messages, one target row per intended recipient
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    message_id        INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_type TEXT NOT NULL,           -- private | group
    conversation_id   TEXT NOT NULL,
    sender_id         TEXT NOT NULL,
    sender_nickname   TEXT NOT NULL,           -- denormalized snapshot
    content           TEXT NOT NULL,
    created_at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS message_targets (
    message_id   INTEGER NOT NULL,
    user_id      TEXT NOT NULL,
    delivered_at INTEGER,                      -- NULL = pending offline replay
    PRIMARY KEY (message_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_type, conversation_id);
CREATE INDEX IF NOT EXISTS idx_targets_user
    ON message_targets(user_id, delivered_at);

-- ----------------------------------------------------------------
-- Files: the file_uploads row doubles as the "not yet downloadable" lock
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS files (
    file_id           TEXT PRIMARY KEY NOT NULL,
    uploader_id       TEXT NOT NULL,
    conversation_type TEXT NOT NULL,
    conversation_id   TEXT NOT NULL,
    file_name         TEXT NOT NULL,
    file_size         INTEGER NOT NULL,
    sha256            TEXT NOT NULL,           -- 64 lowercase hex chars
    storage_path      TEXT NOT NULL,
    created_at        INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS file_uploads (
    file_id       TEXT PRIMARY KEY NOT NULL,
    uploader_id   TEXT NOT NULL,
    temp_path     TEXT NOT NULL,
    uploaded_size INTEGER NOT NULL,
    status        TEXT NOT NULL,               -- always 'uploading'
    updated_at    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS file_targets (
    file_id      TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    delivered_at INTEGER,
    PRIMARY KEY (file_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_files_conversation
    ON files(conversation_type, conversation_id);
CREATE INDEX IF NOT EXISTS idx_file_targets_user
    ON file_targets(user_id, delivered_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
