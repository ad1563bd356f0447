//! Framed packet types.
//!
//! Every packet on the wire is a fixed 28-byte header followed by a UTF-8
//! JSON metadata section and an opaque binary section. The numeric type
//! codes are part of the wire contract and must not be renumbered.

/// `"OLTK"` in big-endian.
pub const MAGIC: u32 = 0x4F4C_544B;
pub const VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 28;

/// Metadata section cap (1 MiB).
pub const MAX_META_SIZE: u32 = 1024 * 1024;
/// Binary section cap (32 MiB). Bounds any single file chunk.
pub const MAX_BINARY_SIZE: u32 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    AuthRegister = 1,
    AuthLogin = 2,
    AuthOk = 3,
    AuthError = 4,
    UserListUpdate = 5,
    PresenceUpdate = 6,
    GroupCreate = 7,
    GroupJoin = 8,
    GroupLeave = 9,
    GroupAdmin = 10,
    MessageSend = 11,
    MessageDeliver = 12,
    HistoryFetch = 13,
    HistoryResponse = 14,
    FileOffer = 15,
    FileAccept = 16,
    FileUploadChunk = 17,
    FileUploadDone = 18,
    FileDownloadRequest = 19,
    FileDownloadChunk = 20,
    FileDone = 21,
}

impl PacketType {
    pub fn from_u16(value: u16) -> Option<Self> {
        use PacketType::*;
        Some(match value {
            1 => AuthRegister,
            2 => AuthLogin,
            3 => AuthOk,
            4 => AuthError,
            5 => UserListUpdate,
            6 => PresenceUpdate,
            7 => GroupCreate,
            8 => GroupJoin,
            9 => GroupLeave,
            10 => GroupAdmin,
            11 => MessageSend,
            12 => MessageDeliver,
            13 => HistoryFetch,
            14 => HistoryResponse,
            15 => FileOffer,
            16 => FileAccept,
            17 => FileUploadChunk,
            18 => FileUploadDone,
            19 => FileDownloadRequest,
            20 => FileDownloadChunk,
            21 => FileDone,
            _ => return None,
        })
    }
}

/// One decoded wire packet.
///
/// `packet_type` is kept as the raw u16 so that unknown types survive decode
/// and can be logged instead of tearing the connection down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: u16,
    pub flags: u32,
    pub request_id: u64,
    pub meta_json: String,
    pub binary: Vec<u8>,
}

impl Packet {
    pub fn new(packet_type: PacketType, request_id: u64, meta_json: String) -> Self {
        Self {
            packet_type: packet_type as u16,
            flags: 0,
            request_id,
            meta_json,
            binary: Vec::new(),
        }
    }

    pub fn with_binary(
        packet_type: PacketType,
        request_id: u64,
        meta_json: String,
        binary: Vec<u8>,
    ) -> Self {
        Self {
            packet_type: packet_type as u16,
            flags: 0,
            request_id,
            meta_json,
            binary,
        }
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::from_u16(self.packet_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_round_trip() {
        for code in 1..=21u16 {
            let ty = PacketType::from_u16(code).expect("known code");
            assert_eq!(ty as u16, code);
        }
        assert!(PacketType::from_u16(0).is_none());
        assert!(PacketType::from_u16(22).is_none());
    }
}
