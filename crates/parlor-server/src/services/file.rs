//! File storage engine: offer, chunked append, finalize, ranged read.
//!
//! The `file_uploads` row is the mutual-exclusion lock on downloadability;
//! the temp-to-final rename inside finalize is the atomic publish point.
//! Temp files live in `data_dir/tmp/{file_id}.part`, published files in
//! `data_dir/files/{file_id}_{sanitized_name}`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parlor_shared::files::{ensure_dir, sanitize_file_name};
use parlor_shared::hash::sha256_hex_file;
use parlor_store::{Database, FileNotice, FileOffer, StoreError, UploadInfo};
use thiserror::Error;

use super::{generate_id, now_seconds};

#[derive(Error, Debug)]
pub enum FileError {
    #[error("file_size must be positive")]
    InvalidSize,

    #[error("recipients empty")]
    NoRecipients,

    #[error("upload not found")]
    UploadNotFound,

    #[error("file not found")]
    FileNotFound,

    #[error("uploader mismatch")]
    UploaderMismatch,

    #[error("offset mismatch")]
    OffsetMismatch { expected: i64 },

    #[error("chunk exceeds file size")]
    ChunkExceedsFileSize,

    #[error("file not fully uploaded")]
    NotFullyUploaded,

    #[error("sha256 mismatch")]
    Sha256Mismatch,

    #[error("no permission to download")]
    NoPermission,

    #[error("file is still uploading")]
    StillUploading,

    #[error("offset out of range")]
    OffsetOutOfRange,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct FileStore {
    files_dir: PathBuf,
    temp_dir: PathBuf,
    chunk_size: i64,
}

impl FileStore {
    pub fn new(data_dir: impl AsRef<Path>, chunk_size: i64) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            files_dir: data_dir.join("files"),
            temp_dir: data_dir.join("tmp"),
            chunk_size,
        }
    }

    pub fn ensure_storage(&self) -> std::io::Result<()> {
        ensure_dir(&self.files_dir)?;
        ensure_dir(&self.temp_dir)
    }

    pub fn chunk_size(&self) -> i64 {
        self.chunk_size
    }

    /// Accept a fresh offer: assign a file id, reserve the storage and temp
    /// paths, and write the file/upload/target rows transactionally.
    pub fn create_upload(
        &self,
        db: &mut Database,
        offer: &FileOffer,
    ) -> Result<UploadInfo, FileError> {
        if offer.file_size <= 0 {
            return Err(FileError::InvalidSize);
        }
        if offer.recipients.is_empty() {
            return Err(FileError::NoRecipients);
        }

        let file_id = generate_id();
        let safe_name = sanitize_file_name(&offer.file_name);
        let storage_path = self.files_dir.join(format!("{file_id}_{safe_name}"));
        let temp_path = self.temp_dir.join(format!("{file_id}.part"));
        self.ensure_storage()?;

        let created_at = now_seconds();
        db.create_upload(
            offer,
            &file_id,
            &storage_path.to_string_lossy(),
            &temp_path.to_string_lossy(),
            created_at,
        )?;

        Ok(UploadInfo {
            file_id,
            conversation_type: offer.conversation_type.clone(),
            conversation_id: offer.conversation_id.clone(),
            file_name: offer.file_name.clone(),
            file_size: offer.file_size,
            sha256: offer.sha256.clone(),
            uploader_id: offer.uploader_id.clone(),
            uploader_nickname: offer.uploader_nickname.clone(),
            storage_path: storage_path.to_string_lossy().into_owned(),
            created_at,
            temp_path: temp_path.to_string_lossy().into_owned(),
            uploaded_size: 0,
        })
    }

    /// Re-open an interrupted upload. The temp file on disk is the source of
    /// truth for bytes present; the row is re-synced to it when they differ.
    pub fn resume_upload(
        &self,
        db: &Database,
        file_id: &str,
        uploader_id: &str,
    ) -> Result<UploadInfo, FileError> {
        let mut info = self.owned_upload(db, file_id, uploader_id)?;

        let actual_size = std::fs::metadata(&info.temp_path)
            .map(|m| m.len() as i64)
            .unwrap_or(0);
        if actual_size != info.uploaded_size {
            db.set_uploaded_size(file_id, actual_size, now_seconds())?;
            info.uploaded_size = actual_size;
        }
        Ok(info)
    }

    /// Append one chunk at exactly the current upload offset.
    pub fn append_chunk(
        &self,
        db: &Database,
        file_id: &str,
        uploader_id: &str,
        offset: i64,
        data: &[u8],
    ) -> Result<UploadInfo, FileError> {
        let mut info = self.owned_upload(db, file_id, uploader_id)?;
        if offset != info.uploaded_size {
            return Err(FileError::OffsetMismatch {
                expected: info.uploaded_size,
            });
        }
        if offset + data.len() as i64 > info.file_size {
            return Err(FileError::ChunkExceedsFileSize);
        }

        let mut file = if offset == 0 {
            File::create(&info.temp_path)?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .open(&info.temp_path)?
        };
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        file.flush()?;

        let next_offset = offset + data.len() as i64;
        db.set_uploaded_size(file_id, next_offset, now_seconds())?;
        info.uploaded_size = next_offset;
        Ok(info)
    }

    /// Verify and publish. On success the temp file is renamed into the
    /// storage path and the upload row is deleted; on any failure the temp
    /// file stays in place for a later retry or inspection.
    pub fn finalize_upload(
        &self,
        db: &Database,
        file_id: &str,
        uploader_id: &str,
    ) -> Result<FileNotice, FileError> {
        let info = self.owned_upload(db, file_id, uploader_id)?;
        if info.uploaded_size != info.file_size {
            return Err(FileError::NotFullyUploaded);
        }

        let computed = sha256_hex_file(&info.temp_path)?;
        if computed != info.sha256 {
            return Err(FileError::Sha256Mismatch);
        }

        std::fs::rename(&info.temp_path, &info.storage_path)?;
        db.delete_upload(file_id)?;

        db.file_notice(file_id)?.ok_or(FileError::FileNotFound)
    }

    /// Ranged read of a published file. Returns the chunk, the file record,
    /// and whether this chunk reaches the end of the file.
    pub fn read_chunk(
        &self,
        db: &Database,
        file_id: &str,
        user_id: &str,
        offset: i64,
    ) -> Result<(Vec<u8>, FileNotice, bool), FileError> {
        if !db.has_file_target(file_id, user_id)? {
            return Err(FileError::NoPermission);
        }
        if db.is_uploading(file_id)? {
            return Err(FileError::StillUploading);
        }
        let notice = db.file_notice(file_id)?.ok_or(FileError::FileNotFound)?;
        if offset < 0 || offset >= notice.file_size {
            return Err(FileError::OffsetOutOfRange);
        }

        let mut file = File::open(&notice.storage_path)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        let to_read = (notice.file_size - offset).min(self.chunk_size);
        let mut data = Vec::with_capacity(to_read as usize);
        file.take(to_read as u64).read_to_end(&mut data)?;

        let done = offset + data.len() as i64 >= notice.file_size;
        Ok((data, notice, done))
    }

    fn owned_upload(
        &self,
        db: &Database,
        file_id: &str,
        uploader_id: &str,
    ) -> Result<UploadInfo, FileError> {
        let info = db.upload_info(file_id)?.ok_or(FileError::UploadNotFound)?;
        if info.uploader_id != uploader_id {
            return Err(FileError::UploaderMismatch);
        }
        Ok(info)
    }
}
