//! v002 -- Denormalize the uploader's nickname onto `files`.
//!
//! File notices carry the uploader's nickname at offer time; reading it
//! back from `users` would surface renames retroactively.

use rusqlite::Connection;

const UP_SQL: &str = r#"
ALTER TABLE files ADD COLUMN uploader_nickname TEXT NOT NULL DEFAULT '';
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
