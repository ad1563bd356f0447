use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub user_id: String,
    pub nickname: String,
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Owner,
    Admin,
    Member,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Owner => "owner",
            GroupRole::Admin => "admin",
            GroupRole::Member => "member",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "owner" => Some(GroupRole::Owner),
            "admin" => Some(GroupRole::Admin),
            "member" => Some(GroupRole::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: i64,
}

/// Fields the sender controls when storing a message.
#[derive(Debug, Clone)]
pub struct MessageInput {
    pub conversation_type: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_nickname: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_id: i64,
    pub conversation_type: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_nickname: String,
    pub content: String,
    pub created_at: i64,
}

/// A validated file offer, recipients already computed by the handler.
#[derive(Debug, Clone)]
pub struct FileOffer {
    pub conversation_type: String,
    pub conversation_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub sha256: String,
    pub uploader_id: String,
    pub uploader_nickname: String,
    pub recipients: Vec<String>,
}

/// A published (or publishing) file row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileNotice {
    pub file_id: String,
    pub conversation_type: String,
    pub conversation_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub sha256: String,
    pub uploader_id: String,
    pub uploader_nickname: String,
    pub storage_path: String,
    pub created_at: i64,
}

/// File row joined with its in-flight upload row. Exists only while the
/// `file_uploads` row exists, i.e. before finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadInfo {
    pub file_id: String,
    pub conversation_type: String,
    pub conversation_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub sha256: String,
    pub uploader_id: String,
    pub uploader_nickname: String,
    pub storage_path: String,
    pub created_at: i64,
    pub temp_path: String,
    pub uploaded_size: i64,
}
