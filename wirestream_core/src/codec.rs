//! Fixed-width length codec and a `tokio-util` codec for whole packets.
//!
//! Wire layout of one packet:
//!
//! ```text
//! +----------+---------------------------+-------------------+
//! | type u8  | length i64 (big-endian)   | payload (length)  |
//! +----------+---------------------------+-------------------+
//!   1 byte           8 bytes                 variable
//! ```
use crate::error::{CoreError, CoreErrorKind};
use crate::packet::Packet;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const TYPE_LEN: usize = 1;
pub const LENGTH_PREFIX_LEN: usize = 8;
pub const HEADER_LEN: usize = TYPE_LEN + LENGTH_PREFIX_LEN;
/// Most payload memory reserved before the bytes actually arrive; an
/// announced length alone never allocates more.
pub const MAX_PREALLOCATION: usize = 64 * 1024;

/// Big-endian two's-complement encoding of `value`.
pub fn encode_i64(value: i64) -> [u8; LENGTH_PREFIX_LEN] {
    value.to_be_bytes()
}

/// Decodes the first 8 bytes of `bytes` as a big-endian `i64`.
pub fn decode_i64(bytes: &[u8]) -> Result<i64, CoreError> {
    let Some(prefix) = bytes.first_chunk::<LENGTH_PREFIX_LEN>() else {
        return Err(CoreError::new(
            CoreErrorKind::MalformedLength,
            format!(
                "length prefix needs {LENGTH_PREFIX_LEN} bytes, got {}",
                bytes.len()
            )
            .as_str(),
        ));
    };
    Ok(i64::from_be_bytes(*prefix))
}

/// Validates a decoded length prefix against the receiver's limit.
pub fn checked_length(length: i64, max_payload_length: usize) -> Result<usize, CoreError> {
    if length < 0 {
        return Err(CoreError::new(
            CoreErrorKind::MalformedLength,
            format!("negative payload length {length}").as_str(),
        ));
    }
    match usize::try_from(length) {
        Ok(length) if length <= max_payload_length => Ok(length),
        _ => Err(CoreError::new(
            CoreErrorKind::PayloadTooLarge,
            format!("payload length {length} exceeds the limit of {max_payload_length} bytes")
                .as_str(),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_payload_length: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            max_payload_length: usize::MAX,
        }
    }

    pub fn with_max_payload_length(max_payload_length: usize) -> Self {
        Self { max_payload_length }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CoreError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }

        let length = checked_length(
            decode_i64(&src[TYPE_LEN..HEADER_LEN])?,
            self.max_payload_length,
        )?;
        let Some(frame_len) = HEADER_LEN.checked_add(length) else {
            return Err(CoreError::new(
                CoreErrorKind::PayloadTooLarge,
                "packet size overflows the address space",
            ));
        };

        if src.len() < frame_len {
            src.reserve((frame_len - src.len()).min(MAX_PREALLOCATION));
            return Ok(None);
        }

        let packet_type = src.get_u8();
        src.advance(LENGTH_PREFIX_LEN);
        let payload = src.split_to(length).freeze();
        Ok(Some(Packet::new(packet_type, payload)))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CoreError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.encoded_len());
        dst.put_u8(item.packet_type());
        dst.put_slice(&encode_i64(item.length()));
        dst.put_slice(item.payload());
        Ok(())
    }
}
