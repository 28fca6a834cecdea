use crate::error::{CoreError, CoreErrorKind};
use crate::packet::Packet;
use log::debug;
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Anything a [`Connection`] can carry packets over.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub(crate) type BoxedTransport = Box<dyn Transport>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Cheaply cloneable handle to one byte-stream transport.
///
/// Clones share the same transport; equality and hashing use the
/// process-unique [`Connection::id`].
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: u64,
    peer_addr: Option<SocketAddr>,
    reader: Mutex<ReadHalf<BoxedTransport>>,
    writer: Mutex<WriteHalf<BoxedTransport>>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new<T>(io: T) -> Self
    where
        T: Transport,
    {
        Self::build(Box::new(io), None)
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Self::build(Box::new(stream), peer_addr)
    }

    fn build(io: BoxedTransport, peer_addr: Option<SocketAddr>) -> Self {
        let (reader, writer) = tokio::io::split(io);
        Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                peer_addr,
                reader: Mutex::new(reader),
                writer: Mutex::new(writer),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once [`Connection::close`] has been called on any clone.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub(crate) async fn lock_reader(&self) -> MutexGuard<'_, ReadHalf<BoxedTransport>> {
        self.inner.reader.lock().await
    }

    /// Writes the whole packet, giving up as soon as the connection is closed.
    pub async fn write_packet(&self, packet: &Packet, max_write_size: usize) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        tokio::select! {
            _ = self.inner.closed.cancelled() => Err(self.closed_error()),
            result = async {
                let mut writer = self.inner.writer.lock().await;
                packet.write_to(&mut *writer, max_write_size).await
            } => result,
        }
    }

    /// Marks the connection closed and shuts down its write half.
    /// Closing an already closed connection does nothing.
    pub async fn close(&self) -> Result<(), CoreError> {
        if self.inner.closed.is_cancelled() {
            return Ok(());
        }
        self.inner.closed.cancel();
        debug!("Closing {self}");
        let mut writer = self.inner.writer.lock().await;
        writer.shutdown().await?;
        Ok(())
    }

    fn closed_error(&self) -> CoreError {
        CoreError::new(
            CoreErrorKind::ConnectionClosed,
            format!("{self} is closed").as_str(),
        )
    }
}

impl Display for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.inner.peer_addr {
            Some(addr) => write!(f, "connection #{} ({addr})", self.inner.id),
            None => write!(f, "connection #{}", self.inner.id),
        }
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("peer_addr", &self.inner.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn clones_share_identity() {
        let (io, _peer) = tokio::io::duplex(64);
        let connection = Connection::new(io);
        let clone = connection.clone();

        let (other_io, _other_peer) = tokio::io::duplex(64);
        let other = Connection::new(other_io);

        assert_eq!(connection, clone);
        assert_ne!(connection, other);
        assert!(connection.peer_addr().is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_signals_the_peer() {
        let (io, mut peer) = tokio::io::duplex(64);
        let connection = Connection::new(io);

        connection.close().await.unwrap();
        connection.close().await.unwrap();
        assert!(connection.is_closed());

        let err = Packet::read_from(&mut peer, usize::MAX).await.unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::IoError(std::io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn write_after_close_fails() {
        let (io, _peer) = tokio::io::duplex(64);
        let connection = Connection::new(io);
        connection.close().await.unwrap();

        let err = connection
            .write_packet(&Packet::new(0, Bytes::from_static(b"late")), 1024)
            .await
            .unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::ConnectionClosed);
    }
}
