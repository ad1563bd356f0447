//! Typed metadata schemas for packet JSON sections.
//!
//! Field names here are the wire contract. Every struct is lenient on
//! decode (`#[serde(default)]`) so a missing field reads as its zero value
//! and length validation happens in the handlers, matching the server's
//! status discipline: errors carry `status:"error"` + `code` + `message`,
//! successes carry `status:"ok"` or rely on their own flags.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSummary {
    pub user_id: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthRegisterMeta {
    pub user_id: String,
    pub nickname: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthLoginMeta {
    pub user_id: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOkMeta {
    pub user_id: String,
    pub nickname: String,
    pub registered: bool,
    pub logged_in: bool,
    pub online_users: Vec<UserSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthErrorMeta {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserListMeta {
    pub users: Vec<UserSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupCreateMeta {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupIdMeta {
    pub group_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupAdminMeta {
    pub action: String,
    pub group_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSendMeta {
    pub conversation_type: String,
    pub conversation_id: String,
    pub content: String,
}

/// Also the per-message record inside [`HistoryResponseMeta`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageDeliverMeta {
    pub message_id: i64,
    pub conversation_type: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_nickname: String,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryFetchMeta {
    pub conversation_type: String,
    pub conversation_id: String,
    pub before_message_id: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryResponseMeta {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub conversation_type: String,
    pub conversation_id: String,
    pub messages: Vec<MessageDeliverMeta>,
    pub next_before_message_id: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileOfferMeta {
    pub conversation_type: String,
    pub conversation_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub sha256: String,
    /// Present when resuming an interrupted upload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileAcceptMeta {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub file_id: String,
    pub next_offset: i64,
    pub chunk_size: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileChunkMeta {
    pub file_id: String,
    pub offset: i64,
}

/// Server ack for one uploaded chunk. `expected_offset` is attached on
/// offset mismatch so the client can seek and retry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadAckMeta {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileIdMeta {
    pub file_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadRequestMeta {
    pub file_id: String,
    pub offset: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadChunkMeta {
    pub file_id: String,
    pub offset: i64,
    pub file_size: i64,
    pub file_name: String,
    pub sha256: String,
    pub done: bool,
}

/// Full file notice: the `FileDone` payload, both as finalize response and
/// as server push, and the per-file record replayed at login.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileNoticeMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub file_id: String,
    pub conversation_type: String,
    pub conversation_id: String,
    pub file_name: String,
    pub file_size: i64,
    pub sha256: String,
    pub uploader_id: String,
    pub uploader_nickname: String,
    pub created_at: i64,
}

/// Lenient parse of the `status`/`code`/`message` triple any response may
/// carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusMeta {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusMeta {
    /// Responses either carry `status:"ok"` or omit status entirely.
    pub fn is_ok(&self) -> bool {
        self.status.is_empty() || self.status == "ok"
    }
}
