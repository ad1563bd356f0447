//! Per-packet validation, authorization and response shaping.
//!
//! Handlers always reply on the request's own `request_id`; server-initiated
//! pushes (`UserListUpdate`, `MessageDeliver`, `FileDone` fan-out) carry
//! `request_id` 0. Error replies are `status:"error"` plus a machine `code`
//! and a human `message`; service errors are translated here and never leak
//! raw backend strings outside the `message` field.

use parlor_shared::meta::{
    AuthErrorMeta, AuthLoginMeta, AuthOkMeta, AuthRegisterMeta, DownloadChunkMeta,
    DownloadRequestMeta, FileAcceptMeta, FileChunkMeta, FileIdMeta, FileNoticeMeta, FileOfferMeta,
    GroupAdminMeta, GroupCreateMeta, GroupIdMeta, HistoryFetchMeta, HistoryResponseMeta,
    MessageDeliverMeta, MessageSendMeta,
};
use parlor_shared::{Packet, PacketType};
use parlor_store::{FileNotice, FileOffer, MessageInput, StoredMessage};
use serde_json::json;

use crate::server::ChatServer;
use crate::services::file::FileError;
use crate::services::{auth, group, message};

const MAX_FIELD_LEN: usize = 64;
const MAX_CONTENT_LEN: usize = 4096;
const MAX_FILE_NAME_LEN: usize = 255;
const SHA256_HEX_LEN: usize = 64;

fn validate_field(value: &str, field: &str, max_len: usize) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{field} is required"));
    }
    if value.len() > max_len {
        return Err(format!("{field} too long"));
    }
    Ok(())
}

fn deliver_meta(message: &StoredMessage) -> MessageDeliverMeta {
    MessageDeliverMeta {
        message_id: message.message_id,
        conversation_type: message.conversation_type.clone(),
        conversation_id: message.conversation_id.clone(),
        sender_id: message.sender_id.clone(),
        sender_nickname: message.sender_nickname.clone(),
        content: message.content.clone(),
        created_at: message.created_at,
    }
}

fn notice_meta(notice: &FileNotice, status: Option<&str>) -> FileNoticeMeta {
    FileNoticeMeta {
        status: status.map(str::to_owned),
        file_id: notice.file_id.clone(),
        conversation_type: notice.conversation_type.clone(),
        conversation_id: notice.conversation_id.clone(),
        file_name: notice.file_name.clone(),
        file_size: notice.file_size,
        sha256: notice.sha256.clone(),
        uploader_id: notice.uploader_id.clone(),
        uploader_nickname: notice.uploader_nickname.clone(),
        created_at: notice.created_at,
    }
}

impl ChatServer {
    pub(crate) fn handle_packet(&mut self, conn_id: u64, packet: Packet) {
        match packet.packet_type() {
            Some(PacketType::AuthRegister) => self.handle_register(conn_id, &packet),
            Some(PacketType::AuthLogin) => self.handle_login(conn_id, &packet),
            Some(
                PacketType::GroupCreate
                | PacketType::GroupJoin
                | PacketType::GroupLeave
                | PacketType::GroupAdmin,
            ) => self.handle_group(conn_id, &packet),
            Some(PacketType::MessageSend) => self.handle_message(conn_id, &packet),
            Some(PacketType::HistoryFetch) => self.handle_history(conn_id, &packet),
            Some(PacketType::FileOffer) => self.handle_file_offer(conn_id, &packet),
            Some(PacketType::FileUploadChunk) => self.handle_file_chunk(conn_id, &packet),
            Some(PacketType::FileUploadDone) => self.handle_file_done(conn_id, &packet),
            Some(PacketType::FileDownloadRequest) => self.handle_file_download(conn_id, &packet),
            _ => {
                tracing::warn!(
                    conn_id,
                    packet_type = packet.packet_type,
                    "unhandled packet type"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    fn handle_register(&mut self, conn_id: u64, packet: &Packet) {
        let req = packet.request_id;
        let meta: AuthRegisterMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_auth_error(conn_id, req, "INVALID_JSON", &format!("invalid json: {e}"))
            }
        };

        if let Err(msg) = validate_field(&meta.user_id, "user_id", MAX_FIELD_LEN) {
            return self.send_auth_error(conn_id, req, "INVALID_USER_ID", &msg);
        }
        if let Err(msg) = validate_field(&meta.nickname, "nickname", MAX_FIELD_LEN) {
            return self.send_auth_error(conn_id, req, "INVALID_NICKNAME", &msg);
        }
        if let Err(msg) = validate_field(&meta.password, "password", MAX_FIELD_LEN) {
            return self.send_auth_error(conn_id, req, "INVALID_PASSWORD", &msg);
        }

        match auth::register_user(&self.db, &meta.user_id, &meta.nickname, &meta.password) {
            Ok(()) => {
                let ok = AuthOkMeta {
                    registered: true,
                    logged_in: false,
                    ..Default::default()
                };
                let meta_json = serde_json::to_string(&ok).unwrap_or_default();
                self.queue_packet(conn_id, &Packet::new(PacketType::AuthOk, req, meta_json));
            }
            Err(auth::AuthError::AlreadyExists) => {
                self.send_auth_error(conn_id, req, "ALREADY_EXISTS", "user already exists");
            }
            Err(e) => self.send_auth_error(conn_id, req, "REGISTER_FAILED", &e.to_string()),
        }
    }

    fn handle_login(&mut self, conn_id: u64, packet: &Packet) {
        let req = packet.request_id;
        let meta: AuthLoginMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_auth_error(conn_id, req, "INVALID_JSON", &format!("invalid json: {e}"))
            }
        };

        if let Err(msg) = validate_field(&meta.user_id, "user_id", MAX_FIELD_LEN) {
            return self.send_auth_error(conn_id, req, "INVALID_USER_ID", &msg);
        }
        if let Err(msg) = validate_field(&meta.password, "password", MAX_FIELD_LEN) {
            return self.send_auth_error(conn_id, req, "INVALID_PASSWORD", &msg);
        }

        let user = match auth::login_user(&self.db, &meta.user_id, &meta.password) {
            Ok(user) => user,
            Err(e) => return self.send_auth_error(conn_id, req, "LOGIN_FAILED", &e.to_string()),
        };
        if let Err(e) = self.sessions.login(conn_id, &user.user_id, &user.nickname) {
            return self.send_auth_error(conn_id, req, "LOGIN_FAILED", &e.to_string());
        }

        tracing::info!(user_id = %user.user_id, "login ok");
        self.send_auth_ok(conn_id, req);
        self.broadcast_user_list();
        self.deliver_offline_messages(&user.user_id, conn_id);
        self.deliver_offline_files(&user.user_id, conn_id);
    }

    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    fn handle_group(&mut self, conn_id: u64, packet: &Packet) {
        let Some(packet_type) = packet.packet_type() else {
            return;
        };
        let req = packet.request_id;
        let Some((user_id, _)) = self.logged_in_user(conn_id) else {
            return self.send_error(conn_id, packet_type, req, "NOT_LOGGED_IN", "login required");
        };

        match packet_type {
            PacketType::GroupCreate => {
                let meta: GroupCreateMeta = match serde_json::from_str(&packet.meta_json) {
                    Ok(meta) => meta,
                    Err(e) => {
                        return self.send_error(
                            conn_id,
                            packet_type,
                            req,
                            "INVALID_JSON",
                            &format!("invalid json: {e}"),
                        )
                    }
                };
                if let Err(msg) = validate_field(&meta.name, "name", MAX_FIELD_LEN) {
                    return self.send_error(conn_id, packet_type, req, "INVALID_NAME", &msg);
                }
                match group::create_group(&mut self.db, &user_id, &meta.name) {
                    Ok(group_id) => self.send_response(
                        conn_id,
                        packet_type,
                        req,
                        "ok",
                        "",
                        "",
                        json!({ "group_id": group_id, "name": meta.name }),
                    ),
                    Err(e) => {
                        self.send_error(conn_id, packet_type, req, "CREATE_FAILED", &e.to_string())
                    }
                }
            }
            PacketType::GroupJoin | PacketType::GroupLeave => {
                let meta: GroupIdMeta = match serde_json::from_str(&packet.meta_json) {
                    Ok(meta) => meta,
                    Err(e) => {
                        return self.send_error(
                            conn_id,
                            packet_type,
                            req,
                            "INVALID_JSON",
                            &format!("invalid json: {e}"),
                        )
                    }
                };
                if let Err(msg) = validate_field(&meta.group_id, "group_id", MAX_FIELD_LEN) {
                    return self.send_error(conn_id, packet_type, req, "INVALID_GROUP_ID", &msg);
                }
                let result = if packet_type == PacketType::GroupJoin {
                    group::join_group(&self.db, &user_id, &meta.group_id)
                } else {
                    group::leave_group(&self.db, &user_id, &meta.group_id)
                };
                match result {
                    Ok(()) => self.send_response(conn_id, packet_type, req, "ok", "", "", json!({})),
                    Err(e) => {
                        let code = if packet_type == PacketType::GroupJoin {
                            "JOIN_FAILED"
                        } else {
                            "LEAVE_FAILED"
                        };
                        self.send_error(conn_id, packet_type, req, code, &e.to_string())
                    }
                }
            }
            PacketType::GroupAdmin => self.handle_group_admin(conn_id, req, packet, &user_id),
            _ => {}
        }
    }

    fn handle_group_admin(&mut self, conn_id: u64, req: u64, packet: &Packet, user_id: &str) {
        let packet_type = PacketType::GroupAdmin;
        let meta: GroupAdminMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_JSON",
                    &format!("invalid json: {e}"),
                )
            }
        };
        if let Err(msg) = validate_field(&meta.action, "action", MAX_FIELD_LEN)
            .and_then(|_| validate_field(&meta.group_id, "group_id", MAX_FIELD_LEN))
        {
            return self.send_error(conn_id, packet_type, req, "INVALID_REQUEST", &msg);
        }

        match meta.action.as_str() {
            "rename" => {
                let name = meta.name.unwrap_or_default();
                if let Err(msg) = validate_field(&name, "name", MAX_FIELD_LEN) {
                    return self.send_error(conn_id, packet_type, req, "INVALID_NAME", &msg);
                }
                match group::rename_group(&self.db, user_id, &meta.group_id, &name) {
                    Ok(()) => self.send_response(conn_id, packet_type, req, "ok", "", "", json!({})),
                    Err(e) => {
                        self.send_error(conn_id, packet_type, req, "RENAME_FAILED", &e.to_string())
                    }
                }
            }
            "kick" => {
                let target = meta.target_user_id.unwrap_or_default();
                if let Err(msg) = validate_field(&target, "target_user_id", MAX_FIELD_LEN) {
                    return self.send_error(conn_id, packet_type, req, "INVALID_TARGET", &msg);
                }
                match group::kick_user(&self.db, user_id, &meta.group_id, &target) {
                    Ok(()) => self.send_response(conn_id, packet_type, req, "ok", "", "", json!({})),
                    Err(e) => {
                        self.send_error(conn_id, packet_type, req, "KICK_FAILED", &e.to_string())
                    }
                }
            }
            "dissolve" => match group::dissolve_group(&mut self.db, user_id, &meta.group_id) {
                Ok(()) => self.send_response(conn_id, packet_type, req, "ok", "", "", json!({})),
                Err(e) => {
                    self.send_error(conn_id, packet_type, req, "DISSOLVE_FAILED", &e.to_string())
                }
            },
            "promote" | "demote" => {
                let target = meta.target_user_id.unwrap_or_default();
                if let Err(msg) = validate_field(&target, "target_user_id", MAX_FIELD_LEN) {
                    return self.send_error(conn_id, packet_type, req, "INVALID_TARGET", &msg);
                }
                let make_admin = meta.action == "promote";
                match group::set_admin(&self.db, user_id, &meta.group_id, &target, make_admin) {
                    Ok(()) => self.send_response(conn_id, packet_type, req, "ok", "", "", json!({})),
                    Err(e) => {
                        self.send_error(conn_id, packet_type, req, "ADMIN_FAILED", &e.to_string())
                    }
                }
            }
            _ => self.send_error(
                conn_id,
                packet_type,
                req,
                "UNKNOWN_ACTION",
                "unsupported action",
            ),
        }
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    fn handle_message(&mut self, conn_id: u64, packet: &Packet) {
        let packet_type = PacketType::MessageSend;
        let req = packet.request_id;
        let Some((user_id, nickname)) = self.logged_in_user(conn_id) else {
            return self.send_error(conn_id, packet_type, req, "NOT_LOGGED_IN", "login required");
        };
        let meta: MessageSendMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_JSON",
                    &format!("invalid json: {e}"),
                )
            }
        };
        if let Err(msg) = validate_field(&meta.conversation_type, "conversation_type", MAX_FIELD_LEN)
            .and_then(|_| validate_field(&meta.conversation_id, "conversation_id", MAX_FIELD_LEN))
            .and_then(|_| validate_field(&meta.content, "content", MAX_CONTENT_LEN))
        {
            return self.send_error(conn_id, packet_type, req, "INVALID_REQUEST", &msg);
        }

        let recipients = match self.compute_recipients(
            conn_id,
            packet_type,
            req,
            &user_id,
            &meta.conversation_type,
            &meta.conversation_id,
            true,
        ) {
            Some(recipients) => recipients,
            None => return,
        };

        let input = MessageInput {
            conversation_type: meta.conversation_type,
            conversation_id: meta.conversation_id,
            sender_id: user_id,
            sender_nickname: nickname,
            content: meta.content,
        };
        let stored = match message::store_message(&mut self.db, &input, &recipients) {
            Ok(stored) => stored,
            Err(e) => {
                return self.send_error(conn_id, packet_type, req, "STORE_FAILED", &e.to_string())
            }
        };

        self.send_response(
            conn_id,
            packet_type,
            req,
            "ok",
            "",
            "",
            json!({ "message_id": stored.message_id, "created_at": stored.created_at }),
        );

        // Best-effort push to online recipients; delivered means the push
        // was queued, offline recipients replay at next login.
        let deliver_json = serde_json::to_string(&deliver_meta(&stored)).unwrap_or_default();
        for recipient in &recipients {
            let Some(target_conn) = self.sessions.try_get_conn(recipient) else {
                continue;
            };
            self.queue_packet(
                target_conn,
                &Packet::new(PacketType::MessageDeliver, 0, deliver_json.clone()),
            );
            if let Err(e) = message::mark_delivered(&mut self.db, recipient, &[stored.message_id])
            {
                tracing::warn!(error = %e, "mark delivered failed");
            }
        }
    }

    /// Recipient set for a message or file offer. Private conversations
    /// resolve to the counterparty; group conversations require membership
    /// and expand to all members, minus the sender for messages but
    /// including the uploader for file offers (their own FileDone fan-out
    /// surfaces the file in their client).
    #[allow(clippy::too_many_arguments)]
    fn compute_recipients(
        &mut self,
        conn_id: u64,
        packet_type: PacketType,
        req: u64,
        user_id: &str,
        conversation_type: &str,
        conversation_id: &str,
        exclude_sender: bool,
    ) -> Option<Vec<String>> {
        match conversation_type {
            "private" => match auth::user_exists(&self.db, conversation_id) {
                Err(e) => {
                    self.send_error(conn_id, packet_type, req, "USER_LOOKUP_FAILED", &e.to_string());
                    None
                }
                Ok(false) => {
                    self.send_error(
                        conn_id,
                        packet_type,
                        req,
                        "TARGET_NOT_FOUND",
                        "target user not found",
                    );
                    None
                }
                Ok(true) => Some(vec![conversation_id.to_owned()]),
            },
            "group" => {
                if let Err(e) = group::user_role(&self.db, user_id, conversation_id) {
                    self.send_error(conn_id, packet_type, req, "NOT_IN_GROUP", &e.to_string());
                    return None;
                }
                let mut members = match group::group_members(&self.db, conversation_id) {
                    Ok(members) => members,
                    Err(e) => {
                        self.send_error(
                            conn_id,
                            packet_type,
                            req,
                            "GROUP_MEMBERS_FAILED",
                            &e.to_string(),
                        );
                        return None;
                    }
                };
                if exclude_sender {
                    members.retain(|member| member != user_id);
                    if members.is_empty() {
                        self.send_error(
                            conn_id,
                            packet_type,
                            req,
                            "NO_RECIPIENTS",
                            "no recipients available",
                        );
                        return None;
                    }
                }
                Some(members)
            }
            _ => {
                self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_CONVERSATION_TYPE",
                    "use private or group",
                );
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    fn handle_history(&mut self, conn_id: u64, packet: &Packet) {
        // Both success and error replies travel as HistoryResponse.
        let packet_type = PacketType::HistoryResponse;
        let req = packet.request_id;
        let Some((user_id, _)) = self.logged_in_user(conn_id) else {
            return self.send_error(conn_id, packet_type, req, "NOT_LOGGED_IN", "login required");
        };
        let meta: HistoryFetchMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_JSON",
                    &format!("invalid json: {e}"),
                )
            }
        };
        if let Err(msg) = validate_field(&meta.conversation_type, "conversation_type", MAX_FIELD_LEN)
            .and_then(|_| validate_field(&meta.conversation_id, "conversation_id", MAX_FIELD_LEN))
        {
            return self.send_error(conn_id, packet_type, req, "INVALID_REQUEST", &msg);
        }

        let page_size = self.config.history_page_size;
        let limit = if meta.limit > 0 {
            meta.limit.min(page_size)
        } else {
            page_size
        };

        let result = match meta.conversation_type.as_str() {
            "group" => {
                if let Err(e) = group::user_role(&self.db, &user_id, &meta.conversation_id) {
                    return self.send_error(conn_id, packet_type, req, "NOT_IN_GROUP", &e.to_string());
                }
                self.db
                    .group_history(&meta.conversation_id, meta.before_message_id, limit)
            }
            "private" => self.db.private_history(
                &user_id,
                &meta.conversation_id,
                meta.before_message_id,
                limit,
            ),
            _ => {
                return self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_CONVERSATION_TYPE",
                    "use private or group",
                )
            }
        };
        let mut messages = match result {
            Ok(messages) => messages,
            Err(e) => {
                return self.send_error(conn_id, packet_type, req, "HISTORY_FAILED", &e.to_string())
            }
        };
        // The query walks newest-first; the page itself travels in ascending
        // order so clients can prepend it wholesale.
        messages.reverse();

        let response = HistoryResponseMeta {
            status: "ok".to_owned(),
            code: None,
            message: None,
            conversation_type: meta.conversation_type,
            conversation_id: meta.conversation_id,
            next_before_message_id: messages.first().map(|m| m.message_id).unwrap_or(0),
            count: messages.len() as i64,
            messages: messages.iter().map(deliver_meta).collect(),
        };
        let meta_json = serde_json::to_string(&response).unwrap_or_default();
        self.queue_packet(conn_id, &Packet::new(packet_type, req, meta_json));
    }

    // ------------------------------------------------------------------
    // Files
    // ------------------------------------------------------------------

    fn handle_file_offer(&mut self, conn_id: u64, packet: &Packet) {
        let packet_type = PacketType::FileOffer;
        let req = packet.request_id;
        let Some((user_id, nickname)) = self.logged_in_user(conn_id) else {
            return self.send_error(conn_id, packet_type, req, "NOT_LOGGED_IN", "login required");
        };
        let meta: FileOfferMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_JSON",
                    &format!("invalid json: {e}"),
                )
            }
        };
        if let Err(msg) = validate_field(&meta.conversation_type, "conversation_type", MAX_FIELD_LEN)
            .and_then(|_| validate_field(&meta.conversation_id, "conversation_id", MAX_FIELD_LEN))
            .and_then(|_| validate_field(&meta.file_name, "file_name", MAX_FILE_NAME_LEN))
            .and_then(|_| validate_field(&meta.sha256, "sha256", SHA256_HEX_LEN))
        {
            return self.send_error(conn_id, packet_type, req, "INVALID_REQUEST", &msg);
        }
        if meta.sha256.len() != SHA256_HEX_LEN {
            return self.send_error(
                conn_id,
                packet_type,
                req,
                "INVALID_SHA256",
                "sha256 length invalid",
            );
        }
        if meta.file_size <= 0 {
            return self.send_error(
                conn_id,
                packet_type,
                req,
                "INVALID_SIZE",
                "file_size must be positive",
            );
        }

        // Group offers target every member, uploader included.
        let recipients = match self.compute_recipients(
            conn_id,
            packet_type,
            req,
            &user_id,
            &meta.conversation_type,
            &meta.conversation_id,
            false,
        ) {
            Some(recipients) => recipients,
            None => return,
        };

        let resume_id = meta.file_id.clone().unwrap_or_default();
        let info = if !resume_id.is_empty() {
            match self.files.resume_upload(&self.db, &resume_id, &user_id) {
                Ok(info) => info,
                Err(e) => {
                    return self.send_error(conn_id, packet_type, req, "RESUME_FAILED", &e.to_string())
                }
            }
        } else {
            let offer = FileOffer {
                conversation_type: meta.conversation_type,
                conversation_id: meta.conversation_id,
                file_name: meta.file_name,
                file_size: meta.file_size,
                sha256: meta.sha256,
                uploader_id: user_id,
                uploader_nickname: nickname,
                recipients,
            };
            match self.files.create_upload(&mut self.db, &offer) {
                Ok(info) => info,
                Err(e) => {
                    return self.send_error(conn_id, packet_type, req, "OFFER_FAILED", &e.to_string())
                }
            }
        };

        let accept = FileAcceptMeta {
            status: "ok".to_owned(),
            code: None,
            message: None,
            file_id: info.file_id,
            next_offset: info.uploaded_size,
            chunk_size: self.files.chunk_size(),
        };
        let meta_json = serde_json::to_string(&accept).unwrap_or_default();
        self.queue_packet(conn_id, &Packet::new(PacketType::FileAccept, req, meta_json));
    }

    fn handle_file_chunk(&mut self, conn_id: u64, packet: &Packet) {
        let packet_type = PacketType::FileUploadChunk;
        let req = packet.request_id;
        let Some((user_id, _)) = self.logged_in_user(conn_id) else {
            return self.send_error(conn_id, packet_type, req, "NOT_LOGGED_IN", "login required");
        };
        let meta: FileChunkMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_JSON",
                    &format!("invalid json: {e}"),
                )
            }
        };
        if let Err(msg) = validate_field(&meta.file_id, "file_id", MAX_FIELD_LEN) {
            return self.send_error(conn_id, packet_type, req, "INVALID_FILE_ID", &msg);
        }
        if packet.binary.is_empty() {
            return self.send_error(conn_id, packet_type, req, "EMPTY_CHUNK", "chunk is empty");
        }
        if packet.binary.len() as i64 > self.files.chunk_size() {
            return self.send_error(conn_id, packet_type, req, "CHUNK_TOO_LARGE", "chunk too large");
        }

        match self
            .files
            .append_chunk(&self.db, &meta.file_id, &user_id, meta.offset, &packet.binary)
        {
            Ok(info) => self.send_response(
                conn_id,
                packet_type,
                req,
                "ok",
                "",
                "",
                json!({ "next_offset": info.uploaded_size }),
            ),
            Err(FileError::OffsetMismatch { expected }) => self.send_response(
                conn_id,
                packet_type,
                req,
                "error",
                "UPLOAD_FAILED",
                "offset mismatch",
                json!({ "expected_offset": expected }),
            ),
            Err(e) => self.send_error(conn_id, packet_type, req, "UPLOAD_FAILED", &e.to_string()),
        }
    }

    fn handle_file_done(&mut self, conn_id: u64, packet: &Packet) {
        let packet_type = PacketType::FileUploadDone;
        let req = packet.request_id;
        let Some((user_id, _)) = self.logged_in_user(conn_id) else {
            return self.send_error(conn_id, packet_type, req, "NOT_LOGGED_IN", "login required");
        };
        let meta: FileIdMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_JSON",
                    &format!("invalid json: {e}"),
                )
            }
        };
        if let Err(msg) = validate_field(&meta.file_id, "file_id", MAX_FIELD_LEN) {
            return self.send_error(conn_id, packet_type, req, "INVALID_FILE_ID", &msg);
        }

        let notice = match self.files.finalize_upload(&self.db, &meta.file_id, &user_id) {
            Ok(notice) => notice,
            Err(e) => {
                return self.send_error(conn_id, packet_type, req, "FINALIZE_FAILED", &e.to_string())
            }
        };

        let response_json =
            serde_json::to_string(&notice_meta(&notice, Some("ok"))).unwrap_or_default();
        self.queue_packet(conn_id, &Packet::new(PacketType::FileDone, req, response_json));

        // Fan the notice out to every online target; the uploader already
        // has the response, so they only get marked delivered.
        let push_json = serde_json::to_string(&notice_meta(&notice, None)).unwrap_or_default();
        let targets = match self.db.file_targets(&meta.file_id) {
            Ok(targets) => targets,
            Err(e) => {
                tracing::warn!(error = %e, "list file targets failed");
                return;
            }
        };
        for target in targets {
            if target != user_id {
                let Some(target_conn) = self.sessions.try_get_conn(&target) else {
                    continue;
                };
                self.queue_packet(
                    target_conn,
                    &Packet::new(PacketType::FileDone, 0, push_json.clone()),
                );
            }
            if let Err(e) =
                self.db
                    .mark_files_delivered(&target, &[meta.file_id.clone()], crate::services::now_seconds())
            {
                tracing::warn!(error = %e, "mark file delivered failed");
            }
        }
    }

    fn handle_file_download(&mut self, conn_id: u64, packet: &Packet) {
        let packet_type = PacketType::FileDownloadRequest;
        let req = packet.request_id;
        let Some((user_id, _)) = self.logged_in_user(conn_id) else {
            return self.send_error(conn_id, packet_type, req, "NOT_LOGGED_IN", "login required");
        };
        let meta: DownloadRequestMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(meta) => meta,
            Err(e) => {
                return self.send_error(
                    conn_id,
                    packet_type,
                    req,
                    "INVALID_JSON",
                    &format!("invalid json: {e}"),
                )
            }
        };
        if let Err(msg) = validate_field(&meta.file_id, "file_id", MAX_FIELD_LEN) {
            return self.send_error(conn_id, packet_type, req, "INVALID_FILE_ID", &msg);
        }

        match self
            .files
            .read_chunk(&self.db, &meta.file_id, &user_id, meta.offset)
        {
            Ok((data, notice, done)) => {
                let chunk_meta = DownloadChunkMeta {
                    file_id: notice.file_id,
                    offset: meta.offset,
                    file_size: notice.file_size,
                    file_name: notice.file_name,
                    sha256: notice.sha256,
                    done,
                };
                let meta_json = serde_json::to_string(&chunk_meta).unwrap_or_default();
                self.queue_packet(
                    conn_id,
                    &Packet::with_binary(PacketType::FileDownloadChunk, req, meta_json, data),
                );
            }
            Err(e @ FileError::NoPermission) => {
                self.send_error(conn_id, packet_type, req, "NO_PERMISSION", &e.to_string())
            }
            Err(e @ FileError::StillUploading) => self.send_error(
                conn_id,
                packet_type,
                req,
                "FILE_STILL_UPLOADING",
                &e.to_string(),
            ),
            Err(e @ FileError::OffsetOutOfRange) => {
                self.send_error(conn_id, packet_type, req, "OUT_OF_RANGE", &e.to_string())
            }
            Err(e) => self.send_error(conn_id, packet_type, req, "DOWNLOAD_FAILED", &e.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Offline replay
    // ------------------------------------------------------------------

    fn deliver_offline_messages(&mut self, user_id: &str, conn_id: u64) {
        loop {
            let batch = self.config.history_page_size.max(1);
            let messages = match message::fetch_undelivered(&self.db, user_id, batch) {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::warn!(error = %e, "fetch offline messages failed");
                    return;
                }
            };
            if messages.is_empty() {
                return;
            }

            let mut delivered_ids = Vec::with_capacity(messages.len());
            for msg in &messages {
                let meta_json = serde_json::to_string(&deliver_meta(msg)).unwrap_or_default();
                self.queue_packet(conn_id, &Packet::new(PacketType::MessageDeliver, 0, meta_json));
                delivered_ids.push(msg.message_id);
            }
            if let Err(e) = message::mark_delivered(&mut self.db, user_id, &delivered_ids) {
                tracing::warn!(error = %e, "mark offline delivered failed");
                return;
            }
        }
    }

    fn deliver_offline_files(&mut self, user_id: &str, conn_id: u64) {
        loop {
            let batch = self.config.history_page_size.max(1);
            let notices = match self.db.fetch_undelivered_files(user_id, batch) {
                Ok(notices) => notices,
                Err(e) => {
                    tracing::warn!(error = %e, "fetch offline files failed");
                    return;
                }
            };
            if notices.is_empty() {
                return;
            }

            let mut delivered_ids = Vec::with_capacity(notices.len());
            for notice in &notices {
                let meta_json =
                    serde_json::to_string(&notice_meta(notice, None)).unwrap_or_default();
                self.queue_packet(conn_id, &Packet::new(PacketType::FileDone, 0, meta_json));
                delivered_ids.push(notice.file_id.clone());
            }
            if let Err(e) = self.db.mark_files_delivered(
                user_id,
                &delivered_ids,
                crate::services::now_seconds(),
            ) {
                tracing::warn!(error = %e, "mark offline files delivered failed");
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Reply plumbing
    // ------------------------------------------------------------------

    fn logged_in_user(&self, conn_id: u64) -> Option<(String, String)> {
        self.sessions
            .session(conn_id)
            .filter(|session| session.logged_in)
            .map(|session| (session.user_id.clone(), session.nickname.clone()))
    }

    fn send_auth_ok(&self, conn_id: u64, request_id: u64) {
        let Some(session) = self.sessions.session(conn_id) else {
            return;
        };
        let meta = AuthOkMeta {
            user_id: session.user_id.clone(),
            nickname: session.nickname.clone(),
            registered: false,
            logged_in: true,
            online_users: self.sessions.online_users(),
        };
        let meta_json = serde_json::to_string(&meta).unwrap_or_default();
        self.queue_packet(conn_id, &Packet::new(PacketType::AuthOk, request_id, meta_json));
    }

    fn send_auth_error(&self, conn_id: u64, request_id: u64, code: &str, message: &str) {
        let meta = AuthErrorMeta {
            code: code.to_owned(),
            message: message.to_owned(),
        };
        let meta_json = serde_json::to_string(&meta).unwrap_or_default();
        self.queue_packet(
            conn_id,
            &Packet::new(PacketType::AuthError, request_id, meta_json),
        );
    }

    fn send_error(
        &self,
        conn_id: u64,
        packet_type: PacketType,
        request_id: u64,
        code: &str,
        message: &str,
    ) {
        self.send_response(conn_id, packet_type, request_id, "error", code, message, json!({}));
    }

    fn send_response(
        &self,
        conn_id: u64,
        packet_type: PacketType,
        request_id: u64,
        status: &str,
        code: &str,
        message: &str,
        extra: serde_json::Value,
    ) {
        let mut meta = serde_json::Map::new();
        if !status.is_empty() {
            meta.insert("status".to_owned(), json!(status));
        }
        if !code.is_empty() {
            meta.insert("code".to_owned(), json!(code));
        }
        if !message.is_empty() {
            meta.insert("message".to_owned(), json!(message));
        }
        if let serde_json::Value::Object(extra) = extra {
            for (key, value) in extra {
                meta.insert(key, value);
            }
        }
        let meta_json = serde_json::Value::Object(meta).to_string();
        self.queue_packet(conn_id, &Packet::new(packet_type, request_id, meta_json));
    }
}
