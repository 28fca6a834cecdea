use crate::codec::{
    HEADER_LEN, LENGTH_PREFIX_LEN, MAX_PREALLOCATION, TYPE_LEN, checked_length, decode_i64,
    encode_i64,
};
use crate::error::{CoreError, CoreErrorKind};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default upper bound for a single write call while streaming a packet.
pub const DEFAULT_MAX_WRITE_SIZE: usize = 16 * 1024;

/// One typed message with a length-prefixed payload.
///
/// `length` is derived from the payload in [`Packet::new`] and cannot be set
/// on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    packet_type: u8,
    length: i64,
    payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: u8, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        Self {
            packet_type,
            length: payload.len() as i64,
            payload,
        }
    }

    pub fn packet_type(&self) -> u8 {
        self.packet_type
    }

    pub fn length(&self) -> i64 {
        self.length
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0] = self.packet_type;
        header[TYPE_LEN..].copy_from_slice(&encode_i64(self.length));
        header
    }

    pub fn encode(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.encoded_len());
        buffer.put_slice(&self.header());
        buffer.put_slice(&self.payload);
        buffer.freeze()
    }

    /// Parses a buffer that holds exactly one encoded packet.
    pub fn decode(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() < HEADER_LEN {
            return Err(CoreError::new(
                CoreErrorKind::IncompletePacket,
                format!("packet header needs {HEADER_LEN} bytes, got {}", bytes.len()).as_str(),
            ));
        }
        let length = checked_length(decode_i64(&bytes[TYPE_LEN..HEADER_LEN])?, usize::MAX)?;
        let payload = &bytes[HEADER_LEN..];
        if payload.len() < length {
            return Err(CoreError::new(
                CoreErrorKind::IncompletePacket,
                format!("payload needs {length} bytes, got {}", payload.len()).as_str(),
            ));
        }
        if payload.len() > length {
            return Err(CoreError::new(
                CoreErrorKind::MalformedLength,
                format!(
                    "length prefix says {length} bytes but {} follow",
                    payload.len()
                )
                .as_str(),
            ));
        }
        Ok(Self::new(bytes[0], Bytes::copy_from_slice(payload)))
    }

    /// Streams the encoded packet into `sink`, never handing more than
    /// `max_write_size` bytes to a single write. The first failing write
    /// aborts the whole packet.
    pub async fn write_to<W>(&self, sink: &mut W, max_write_size: usize) -> Result<(), CoreError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let max_write_size = max_write_size.max(1);
        let header = self.header();
        for chunk in header
            .chunks(max_write_size)
            .chain(self.payload.chunks(max_write_size))
        {
            sink.write_all(chunk).await?;
        }
        sink.flush().await?;
        Ok(())
    }

    /// Reads one packet: the type byte, the 8-byte length prefix and then
    /// exactly `length` payload bytes. Short reads are accumulated and the
    /// buffer only grows as payload bytes arrive.
    pub async fn read_from<R>(source: &mut R, max_payload_length: usize) -> Result<Self, CoreError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let packet_type = source.read_u8().await?;

        let mut prefix = [0u8; LENGTH_PREFIX_LEN];
        source.read_exact(&mut prefix).await?;
        let length = checked_length(decode_i64(&prefix)?, max_payload_length)?;

        let mut payload = Vec::with_capacity(length.min(MAX_PREALLOCATION));
        (&mut *source)
            .take(length as u64)
            .read_to_end(&mut payload)
            .await?;
        if payload.len() < length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("payload ended after {} of {length} bytes", payload.len()),
            )
            .into());
        }
        Ok(Self::new(packet_type, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<usize>,
        data: Vec<u8>,
        fail_on_write: Option<usize>,
    }

    impl AsyncWrite for RecordingSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.fail_on_write == Some(self.writes.len()) {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink broke")));
            }
            self.writes.push(buf.len());
            self.data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn ping_has_expected_layout() {
        let ping = Packet::new(0, Bytes::from_static(b"ping"));
        assert_eq!(ping.length(), 4);

        let encoded = ping.encode();
        assert_eq!(encoded.len(), 1 + 8 + 4);
        assert_eq!(encoded[0], 0);
        assert_eq!(&encoded[1..9], &[0, 0, 0, 0, 0, 0, 0, 4]);
        assert_eq!(&encoded[9..], b"ping");
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let encoded = Packet::new(3, Bytes::from_static(b"payload")).encode();

        let err = Packet::decode(&encoded[..5]).unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::IncompletePacket);

        let err = Packet::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::IncompletePacket);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut encoded = Packet::new(3, Bytes::from_static(b"abc")).encode().to_vec();
        encoded.push(0);
        let err = Packet::decode(&encoded).unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::MalformedLength);
    }

    proptest! {
        #[test]
        fn packet_roundtrip(packet_type in any::<u8>(), payload in prop::collection::vec(any::<u8>(), 0..2048)) {
            let packet = Packet::new(packet_type, payload.clone());
            let decoded = Packet::decode(&packet.encode()).unwrap();
            prop_assert_eq!(decoded.packet_type(), packet_type);
            prop_assert_eq!(decoded.length(), payload.len() as i64);
            prop_assert_eq!(decoded.payload(), payload.as_slice());
        }
    }

    #[tokio::test]
    async fn write_to_splits_large_payloads() {
        let packet = Packet::new(9, vec![7u8; 40]);
        let mut sink = RecordingSink::default();

        packet.write_to(&mut sink, 16).await.unwrap();

        assert_eq!(sink.writes, vec![9, 16, 16, 8]);
        assert_eq!(sink.data, packet.encode().to_vec());
    }

    #[tokio::test]
    async fn write_to_aborts_on_first_failure() {
        let packet = Packet::new(9, vec![7u8; 40]);
        let mut sink = RecordingSink {
            fail_on_write: Some(2),
            ..Default::default()
        };

        let err = packet.write_to(&mut sink, 16).await.unwrap_err();

        assert_eq!(err.error_kind, CoreErrorKind::IoError(io::ErrorKind::BrokenPipe));
        assert_eq!(sink.writes, vec![9, 16]);
    }

    #[tokio::test]
    async fn read_from_accumulates_short_reads() {
        // A 5 byte pipe forces every read and write to be split.
        let (mut client, mut server) = tokio::io::duplex(5);
        let payload: Vec<u8> = (0..DEFAULT_MAX_WRITE_SIZE + 100).map(|i| i as u8).collect();
        let packet = Packet::new(42, payload.clone());

        let writer = tokio::spawn(async move {
            packet.write_to(&mut client, DEFAULT_MAX_WRITE_SIZE).await.unwrap();
            client
        });

        let received = Packet::read_from(&mut server, usize::MAX).await.unwrap();
        writer.await.unwrap();

        assert_eq!(received.packet_type(), 42);
        assert_eq!(received.payload(), payload.as_slice());
    }

    #[tokio::test]
    async fn read_from_reports_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let err = Packet::read_from(&mut server, usize::MAX).await.unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::IoError(io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn huge_announced_length_fails_without_allocating_it() {
        let mut frame = vec![0u8];
        frame.extend_from_slice(&encode_i64(1 << 50));
        frame.extend_from_slice(b"only a few bytes");
        let mut source = frame.as_slice();

        let err = Packet::read_from(&mut source, usize::MAX).await.unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::IoError(io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn read_from_enforces_the_payload_limit() {
        let (mut client, mut server) = tokio::io::duplex(64);
        Packet::new(1, vec![0u8; 33]).write_to(&mut client, 64).await.unwrap();

        let err = Packet::read_from(&mut server, 32).await.unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::PayloadTooLarge);
    }
}
