//! Conversation state assembled from inbound packets.
//!
//! The UI polls packets off the network endpoint and applies them here:
//! login outcome, the online-user list, live message delivery, paged
//! history merges and file notices.

use std::collections::{HashMap, VecDeque};

use parlor_shared::meta::{
    AuthErrorMeta, AuthOkMeta, FileNoticeMeta, HistoryResponseMeta, MessageDeliverMeta,
    UserListMeta, UserSummary,
};
use parlor_shared::{Packet, PacketType};

use crate::history::HistoryManager;

#[derive(Debug, Default)]
pub struct ConversationState {
    pub conversation_type: String,
    pub conversation_id: String,
    pub messages: VecDeque<MessageDeliverMeta>,
    pub files: Vec<FileNoticeMeta>,
}

#[derive(Debug, Default)]
pub struct ClientState {
    logged_in: bool,
    user_id: String,
    nickname: String,
    online_users: Vec<UserSummary>,
    conversations: HashMap<String, ConversationState>,
    history: HistoryManager,
    last_error: Option<String>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logged_in(&self) -> bool {
        self.logged_in
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn online_users(&self) -> &[UserSummary] {
        &self.online_users
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn conversation(
        &self,
        conversation_type: &str,
        conversation_id: &str,
    ) -> Option<&ConversationState> {
        self.conversations
            .get(&conversation_key(conversation_type, conversation_id))
    }

    pub fn next_history_before_id(&self, conversation_type: &str, conversation_id: &str) -> i64 {
        self.history
            .next_before_id(&conversation_key(conversation_type, conversation_id))
    }

    pub fn has_more_history(&self, conversation_type: &str, conversation_id: &str) -> bool {
        self.history
            .has_more(&conversation_key(conversation_type, conversation_id))
    }

    pub fn reset_history_cursor(&mut self, conversation_type: &str, conversation_id: &str) {
        self.history
            .reset(&conversation_key(conversation_type, conversation_id));
    }

    pub fn apply_packet(&mut self, packet: &Packet) {
        match packet.packet_type() {
            Some(PacketType::AuthOk) => self.apply_auth_ok(&packet.meta_json),
            Some(PacketType::AuthError) => self.apply_auth_error(&packet.meta_json),
            Some(PacketType::UserListUpdate) => self.apply_user_list(&packet.meta_json),
            Some(PacketType::MessageDeliver) => self.apply_message_deliver(&packet.meta_json),
            Some(PacketType::HistoryResponse) => self.apply_history_response(&packet.meta_json),
            Some(PacketType::FileDone) => self.apply_file_notice(&packet.meta_json),
            _ => {}
        }
    }

    fn apply_auth_ok(&mut self, meta_json: &str) {
        let Ok(meta) = serde_json::from_str::<AuthOkMeta>(meta_json) else {
            return;
        };
        self.logged_in = meta.logged_in;
        self.user_id = meta.user_id;
        self.nickname = meta.nickname;
        self.online_users = meta.online_users;
    }

    fn apply_auth_error(&mut self, meta_json: &str) {
        let Ok(meta) = serde_json::from_str::<AuthErrorMeta>(meta_json) else {
            return;
        };
        self.last_error = Some(if meta.code.is_empty() {
            meta.message
        } else {
            format!("{}: {}", meta.code, meta.message)
        });
    }

    fn apply_user_list(&mut self, meta_json: &str) {
        let Ok(meta) = serde_json::from_str::<UserListMeta>(meta_json) else {
            return;
        };
        self.online_users = meta.users;
    }

    fn apply_message_deliver(&mut self, meta_json: &str) {
        let Ok(meta) = serde_json::from_str::<MessageDeliverMeta>(meta_json) else {
            return;
        };
        if meta.conversation_type.is_empty() || meta.conversation_id.is_empty() {
            return;
        }
        let conversation =
            self.ensure_conversation(&meta.conversation_type, &meta.conversation_id);
        conversation.messages.push_back(meta);
    }

    fn apply_history_response(&mut self, meta_json: &str) {
        let Ok(meta) = serde_json::from_str::<HistoryResponseMeta>(meta_json) else {
            return;
        };
        if !meta.status.is_empty() && meta.status != "ok" {
            let message = meta.message.unwrap_or_default();
            self.last_error = Some(match meta.code {
                Some(code) => format!("{code}: {message}"),
                None => message,
            });
            return;
        }
        if meta.conversation_type.is_empty() || meta.conversation_id.is_empty() {
            return;
        }

        let key = conversation_key(&meta.conversation_type, &meta.conversation_id);
        let conversation =
            self.ensure_conversation(&meta.conversation_type, &meta.conversation_id);
        let batch = meta.messages;

        // Pages arrive in ascending id order. An older page is prepended
        // in front of what is already loaded, anything else appends.
        if conversation.messages.is_empty() {
            conversation.messages.extend(batch.iter().cloned());
        } else if !batch.is_empty()
            && batch.last().map(|m| m.message_id)
                < conversation.messages.front().map(|m| m.message_id)
        {
            for message in batch.iter().rev() {
                conversation.messages.push_front(message.clone());
            }
        } else {
            conversation.messages.extend(batch.iter().cloned());
        }

        self.history
            .update(&key, meta.next_before_message_id, meta.count.max(0) as usize);
    }

    fn apply_file_notice(&mut self, meta_json: &str) {
        let Ok(meta) = serde_json::from_str::<FileNoticeMeta>(meta_json) else {
            return;
        };
        if meta.file_id.is_empty() {
            return;
        }
        let conversation =
            self.ensure_conversation(&meta.conversation_type, &meta.conversation_id);
        conversation.files.push(meta);
    }

    fn ensure_conversation(
        &mut self,
        conversation_type: &str,
        conversation_id: &str,
    ) -> &mut ConversationState {
        let key = conversation_key(conversation_type, conversation_id);
        self.conversations
            .entry(key)
            .or_insert_with(|| ConversationState {
                conversation_type: conversation_type.to_owned(),
                conversation_id: conversation_id.to_owned(),
                ..Default::default()
            })
    }
}

fn conversation_key(conversation_type: &str, conversation_id: &str) -> String {
    format!("{conversation_type}:{conversation_id}")
}
