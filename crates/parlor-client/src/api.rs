//! Thin typed wrappers over the transport: each call assigns a request id,
//! shapes the metadata object, and returns the id for correlation.

use parlor_shared::meta::{
    AuthLoginMeta, AuthRegisterMeta, GroupAdminMeta, GroupCreateMeta, GroupIdMeta,
    HistoryFetchMeta, MessageSendMeta,
};
use parlor_shared::PacketType;

use crate::error::ClientError;
use crate::net::Transport;

pub struct ClientApi<'a, T: Transport> {
    net: &'a T,
}

impl<'a, T: Transport> ClientApi<'a, T> {
    pub fn new(net: &'a T) -> Self {
        Self { net }
    }

    pub fn send_register(
        &self,
        user_id: &str,
        nickname: &str,
        password: &str,
    ) -> Result<u64, ClientError> {
        let meta = AuthRegisterMeta {
            user_id: user_id.to_owned(),
            nickname: nickname.to_owned(),
            password: password.to_owned(),
        };
        self.send(PacketType::AuthRegister, &meta)
    }

    pub fn send_login(&self, user_id: &str, password: &str) -> Result<u64, ClientError> {
        let meta = AuthLoginMeta {
            user_id: user_id.to_owned(),
            password: password.to_owned(),
        };
        self.send(PacketType::AuthLogin, &meta)
    }

    pub fn send_message(
        &self,
        conversation_type: &str,
        conversation_id: &str,
        content: &str,
    ) -> Result<u64, ClientError> {
        let meta = MessageSendMeta {
            conversation_type: conversation_type.to_owned(),
            conversation_id: conversation_id.to_owned(),
            content: content.to_owned(),
        };
        self.send(PacketType::MessageSend, &meta)
    }

    pub fn fetch_history(
        &self,
        conversation_type: &str,
        conversation_id: &str,
        before_message_id: i64,
        limit: i64,
    ) -> Result<u64, ClientError> {
        let meta = HistoryFetchMeta {
            conversation_type: conversation_type.to_owned(),
            conversation_id: conversation_id.to_owned(),
            before_message_id,
            limit,
        };
        self.send(PacketType::HistoryFetch, &meta)
    }

    pub fn create_group(&self, name: &str) -> Result<u64, ClientError> {
        let meta = GroupCreateMeta {
            name: name.to_owned(),
        };
        self.send(PacketType::GroupCreate, &meta)
    }

    pub fn join_group(&self, group_id: &str) -> Result<u64, ClientError> {
        let meta = GroupIdMeta {
            group_id: group_id.to_owned(),
        };
        self.send(PacketType::GroupJoin, &meta)
    }

    pub fn leave_group(&self, group_id: &str) -> Result<u64, ClientError> {
        let meta = GroupIdMeta {
            group_id: group_id.to_owned(),
        };
        self.send(PacketType::GroupLeave, &meta)
    }

    pub fn rename_group(&self, group_id: &str, name: &str) -> Result<u64, ClientError> {
        self.send_admin(GroupAdminMeta {
            action: "rename".to_owned(),
            group_id: group_id.to_owned(),
            name: Some(name.to_owned()),
            target_user_id: None,
        })
    }

    pub fn kick_from_group(&self, group_id: &str, target_user_id: &str) -> Result<u64, ClientError> {
        self.send_admin(GroupAdminMeta {
            action: "kick".to_owned(),
            group_id: group_id.to_owned(),
            name: None,
            target_user_id: Some(target_user_id.to_owned()),
        })
    }

    pub fn dissolve_group(&self, group_id: &str) -> Result<u64, ClientError> {
        self.send_admin(GroupAdminMeta {
            action: "dissolve".to_owned(),
            group_id: group_id.to_owned(),
            name: None,
            target_user_id: None,
        })
    }

    pub fn set_group_admin(
        &self,
        group_id: &str,
        target_user_id: &str,
        make_admin: bool,
    ) -> Result<u64, ClientError> {
        self.send_admin(GroupAdminMeta {
            action: if make_admin { "promote" } else { "demote" }.to_owned(),
            group_id: group_id.to_owned(),
            name: None,
            target_user_id: Some(target_user_id.to_owned()),
        })
    }

    fn send_admin(&self, meta: GroupAdminMeta) -> Result<u64, ClientError> {
        self.send(PacketType::GroupAdmin, &meta)
    }

    fn send<M: serde::Serialize>(&self, packet_type: PacketType, meta: &M) -> Result<u64, ClientError> {
        let request_id = self.net.next_request_id();
        self.net.send_json(packet_type, request_id, meta, None)?;
        Ok(request_id)
    }
}
