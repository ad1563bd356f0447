//! Encode/decode for the framed wire protocol.
//!
//! Header layout, big-endian throughout:
//!
//! ```text
//! magic(4) version(2) type(2) flags(4) request_id(8) meta_len(4) bin_len(4)
//! ```
//!
//! [`decode`] peeks the header out of the consume-buffer first: a short
//! buffer is a no-op (`Ok(None)`), a bad magic/version or an oversize length
//! is fatal (`Err`), and only a fully buffered packet is consumed.

use crate::buffer::ByteBuffer;
use crate::error::ProtocolError;
use crate::packet::{
    Packet, HEADER_SIZE, MAGIC, MAX_BINARY_SIZE, MAX_META_SIZE, VERSION,
};

pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + packet.meta_json.len() + packet.binary.len());
    out.extend_from_slice(&MAGIC.to_be_bytes());
    out.extend_from_slice(&VERSION.to_be_bytes());
    out.extend_from_slice(&packet.packet_type.to_be_bytes());
    out.extend_from_slice(&packet.flags.to_be_bytes());
    out.extend_from_slice(&packet.request_id.to_be_bytes());
    out.extend_from_slice(&(packet.meta_json.len() as u32).to_be_bytes());
    out.extend_from_slice(&(packet.binary.len() as u32).to_be_bytes());
    out.extend_from_slice(packet.meta_json.as_bytes());
    out.extend_from_slice(&packet.binary);
    out
}

/// Try to decode one packet from the front of `buffer`.
///
/// Returns `Ok(None)` while the packet is still incomplete. On success the
/// packet's bytes are consumed from the buffer.
pub fn decode(buffer: &mut ByteBuffer) -> Result<Option<Packet>, ProtocolError> {
    let data = buffer.as_slice();
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }

    let magic = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    let version = u16::from_be_bytes([data[4], data[5]]);
    let packet_type = u16::from_be_bytes([data[6], data[7]]);
    let flags = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let request_id = u64::from_be_bytes([
        data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
    ]);
    let meta_len = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    let bin_len = u32::from_be_bytes([data[24], data[25], data[26], data[27]]);

    if magic != MAGIC {
        return Err(ProtocolError::InvalidMagic);
    }
    if version != VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    if meta_len > MAX_META_SIZE || bin_len > MAX_BINARY_SIZE {
        return Err(ProtocolError::PayloadTooLarge { meta_len, bin_len });
    }

    let total = HEADER_SIZE + meta_len as usize + bin_len as usize;
    if data.len() < total {
        return Ok(None);
    }

    let meta_end = HEADER_SIZE + meta_len as usize;
    let meta_json = std::str::from_utf8(&data[HEADER_SIZE..meta_end])
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .to_owned();
    let binary = data[meta_end..total].to_vec();

    buffer.consume(total);
    Ok(Some(Packet {
        packet_type,
        flags,
        request_id,
        meta_json,
        binary,
    }))
}
