pub mod v001_initial;
pub mod v002_uploader_nickname;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type MigrationFn = fn(&Connection) -> rusqlite::Result<()>;

/// Ordered schema steps. Each entry raises `PRAGMA user_version` to its
/// version once its SQL has been applied, so a crash between steps resumes
/// at the right place.
const MIGRATIONS: &[(u32, &str, MigrationFn)] = &[
    (1, "initial schema", v001_initial::up),
    (2, "files.uploader_nickname", v002_uploader_nickname::up),
];

pub const CURRENT_VERSION: u32 = 2;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let mut version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version >= CURRENT_VERSION {
        tracing::debug!(schema_version = version, "database schema up to date");
        return Ok(());
    }

    for &(target, step, up) in MIGRATIONS {
        if version >= target {
            continue;
        }
        tracing::info!(from = version, to = target, step, "migrating database schema");
        up(conn).map_err(|e| StoreError::Migration(format!("{step}: {e}")))?;
        conn.pragma_update(None, "user_version", target)?;
        version = target;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_constant_matches_last_step() {
        assert_eq!(MIGRATIONS.last().unwrap().0, CURRENT_VERSION);
    }

    #[test]
    fn steps_are_strictly_ordered() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }
}
