use std::collections::BTreeSet;

use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::{FileNotice, FileOffer, UploadInfo};

impl Database {
    /// Insert the file row, its transient upload row and one target row per
    /// unique recipient, transactionally. While the upload row exists the
    /// file is not downloadable.
    pub fn create_upload(
        &mut self,
        offer: &FileOffer,
        file_id: &str,
        storage_path: &str,
        temp_path: &str,
        now: i64,
    ) -> Result<()> {
        let unique_targets: BTreeSet<&String> = offer.recipients.iter().collect();

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO files (file_id, uploader_id, uploader_nickname, conversation_type,
                                conversation_id, file_name, file_size, sha256, storage_path,
                                created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                file_id,
                offer.uploader_id,
                offer.uploader_nickname,
                offer.conversation_type,
                offer.conversation_id,
                offer.file_name,
                offer.file_size,
                offer.sha256,
                storage_path,
                now
            ],
        )?;
        tx.execute(
            "INSERT INTO file_uploads (file_id, uploader_id, temp_path, uploaded_size,
                                       status, updated_at)
             VALUES (?1, ?2, ?3, 0, 'uploading', ?4)",
            params![file_id, offer.uploader_id, temp_path, now],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO file_targets (file_id, user_id, delivered_at)
                 VALUES (?1, ?2, NULL)",
            )?;
            for user_id in unique_targets {
                stmt.execute(params![file_id, user_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// The file row joined with its in-flight upload row; `None` once the
    /// upload has finalized (or never existed).
    pub fn upload_info(&self, file_id: &str) -> Result<Option<UploadInfo>> {
        let info = self
            .conn()
            .query_row(
                "SELECT f.file_id, f.conversation_type, f.conversation_id, f.file_name,
                        f.file_size, f.sha256, f.uploader_id, f.uploader_nickname,
                        f.storage_path, f.created_at, u.temp_path, u.uploaded_size
                 FROM files f
                 JOIN file_uploads u ON f.file_id = u.file_id
                 WHERE f.file_id = ?1",
                params![file_id],
                row_to_upload_info,
            )
            .optional()?;
        Ok(info)
    }

    pub fn set_uploaded_size(&self, file_id: &str, uploaded_size: i64, now: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE file_uploads SET uploaded_size = ?1, updated_at = ?2 WHERE file_id = ?3",
            params![uploaded_size, now, file_id],
        )?;
        Ok(())
    }

    /// Finalize's database half: drop the upload row, publishing the file.
    pub fn delete_upload(&self, file_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM file_uploads WHERE file_id = ?1",
            params![file_id],
        )?;
        Ok(())
    }

    pub fn file_notice(&self, file_id: &str) -> Result<Option<FileNotice>> {
        let notice = self
            .conn()
            .query_row(
                "SELECT file_id, conversation_type, conversation_id, file_name, file_size,
                        sha256, uploader_id, uploader_nickname, storage_path, created_at
                 FROM files WHERE file_id = ?1",
                params![file_id],
                row_to_file_notice,
            )
            .optional()?;
        Ok(notice)
    }

    /// Undelivered notices for finalized files only: an in-flight upload is
    /// never surfaced to downloaders.
    pub fn fetch_undelivered_files(&self, user_id: &str, limit: i64) -> Result<Vec<FileNotice>> {
        let mut stmt = self.conn().prepare(
            "SELECT f.file_id, f.conversation_type, f.conversation_id, f.file_name,
                    f.file_size, f.sha256, f.uploader_id, f.uploader_nickname,
                    f.storage_path, f.created_at
             FROM file_targets t
             JOIN files f ON t.file_id = f.file_id
             LEFT JOIN file_uploads u ON f.file_id = u.file_id
             WHERE t.user_id = ?1 AND t.delivered_at IS NULL AND u.file_id IS NULL
             ORDER BY f.created_at ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], row_to_file_notice)?;

        let mut notices = Vec::new();
        for row in rows {
            notices.push(row?);
        }
        Ok(notices)
    }

    pub fn mark_files_delivered(
        &mut self,
        user_id: &str,
        file_ids: &[String],
        now: i64,
    ) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }
        let tx = self.conn_mut().transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE file_targets SET delivered_at = ?1
                 WHERE user_id = ?2 AND file_id = ?3",
            )?;
            for file_id in file_ids {
                stmt.execute(params![now, user_id, file_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// A target row is the download permission.
    pub fn has_file_target(&self, file_id: &str, user_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM file_targets WHERE file_id = ?1 AND user_id = ?2",
                params![file_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn is_uploading(&self, file_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM file_uploads WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn file_targets(&self, file_id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM file_targets WHERE file_id = ?1")?;
        let rows = stmt.query_map(params![file_id], |row| row.get(0))?;

        let mut targets = Vec::new();
        for row in rows {
            targets.push(row?);
        }
        Ok(targets)
    }
}

fn row_to_upload_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<UploadInfo> {
    Ok(UploadInfo {
        file_id: row.get(0)?,
        conversation_type: row.get(1)?,
        conversation_id: row.get(2)?,
        file_name: row.get(3)?,
        file_size: row.get(4)?,
        sha256: row.get(5)?,
        uploader_id: row.get(6)?,
        uploader_nickname: row.get(7)?,
        storage_path: row.get(8)?,
        created_at: row.get(9)?,
        temp_path: row.get(10)?,
        uploaded_size: row.get(11)?,
    })
}

fn row_to_file_notice(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileNotice> {
    Ok(FileNotice {
        file_id: row.get(0)?,
        conversation_type: row.get(1)?,
        conversation_id: row.get(2)?,
        file_name: row.get(3)?,
        file_size: row.get(4)?,
        sha256: row.get(5)?,
        uploader_id: row.get(6)?,
        uploader_nickname: row.get(7)?,
        storage_path: row.get(8)?,
        created_at: row.get(9)?,
    })
}
