use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("conversation info required")]
    MissingConversation,

    #[error("file_path required")]
    MissingFilePath,

    #[error("file is empty")]
    EmptyFile,

    #[error("file_id required")]
    MissingFileId,

    #[error("invalid file_size")]
    InvalidFileSize,

    #[error("sha256 required")]
    MissingSha256,

    #[error("invalid chunk size")]
    InvalidChunkSize,

    #[error("failed to read upload file")]
    UploadReadFailed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
