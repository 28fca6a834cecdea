//! The packet stream: a replaceable connection, two bounded queues and the
//! background loops moving packets between them.
//!
//! - one writer task lives as long as the [`Stream`] and always writes to the
//!   connection that is current at write time, retrying failed packets
//! - one reader task runs per attached connection and stops on the first
//!   read failure, when the connection is replaced or when the stream closes
//! - failures never travel through the queues; they go to the error callback
use crate::connection::Connection;
use crate::error::{CoreError, CoreErrorKind};
use crate::io_error::{ErrorCallback, IoError};
use crate::packet::{DEFAULT_MAX_WRITE_SIZE, Packet};
use arc_swap::{ArcSwap, ArcSwapOption};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 1024;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Capacity of the incoming and the outgoing queue. Zero is treated as one.
    pub channel_buffer_size: usize,
    /// Delay before a failed packet is written again.
    pub retry_interval: Duration,
    /// Upper bound for a single write call.
    pub max_write_size: usize,
    /// Inbound packets announcing a larger payload stop the reader.
    pub max_payload_length: usize,
    /// `None` keeps retrying a failed packet until it is written or the
    /// stream closes. `Some(n)` drops it after `n` retries.
    pub max_write_retries: Option<usize>,
}

impl StreamConfig {
    pub fn new(channel_buffer_size: usize) -> Self {
        Self {
            channel_buffer_size,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            max_payload_length: usize::MAX,
            max_write_retries: None,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_BUFFER_SIZE)
    }
}

struct Attachment {
    connection: Connection,
    reader_token: CancellationToken,
}

struct StreamShared {
    config: StreamConfig,
    current: ArcSwapOption<Attachment>,
    on_error: ArcSwap<ErrorCallback>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    attached: Notify,
    incoming: Sender<Packet>,
}

impl StreamShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn report(&self, connection: Connection, cause: CoreError) {
        let callback = self.on_error.load_full();
        (*callback)(IoError::new(connection, cause));
    }
}

/// A readable and writable packet stream over a hot-swappable connection.
///
/// Must be created inside a Tokio runtime; the writer task is spawned
/// immediately.
pub struct Stream {
    shared: Arc<StreamShared>,
    incoming: Mutex<Receiver<Packet>>,
    outgoing: Sender<Packet>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Stream {
    pub fn new(channel_buffer_size: usize) -> Self {
        Self::with_config(StreamConfig::new(channel_buffer_size))
    }

    pub fn with_config(config: StreamConfig) -> Self {
        let capacity = config.channel_buffer_size.max(1);
        let (incoming_tx, incoming_rx) = mpsc::channel(capacity);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(capacity);
        let noop: ErrorCallback = Box::new(|_| {});

        let shared = Arc::new(StreamShared {
            config,
            current: ArcSwapOption::empty(),
            on_error: ArcSwap::from_pointee(noop),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            attached: Notify::new(),
            incoming: incoming_tx,
        });
        let writer = tokio::spawn(write_loop(shared.clone(), outgoing_rx));

        Self {
            shared,
            incoming: Mutex::new(incoming_rx),
            outgoing: outgoing_tx,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Returns the connection currently in use, if one was ever attached.
    pub fn connection(&self) -> Option<Connection> {
        self.shared
            .current
            .load_full()
            .map(|attachment| attachment.connection.clone())
    }

    /// Attaches `connection` and starts reading from it. Can be called any
    /// number of times; queued outgoing packets move to the new connection.
    /// Attaching the connection that is already current is rejected, since
    /// restarting its reader would lose a partially read packet.
    pub fn set_connection(&self, connection: Connection) -> Result<(), CoreError> {
        if self.shared.is_closed() {
            return Err(CoreError::new(
                CoreErrorKind::StreamClosed,
                "set_connection on a closed stream",
            ));
        }
        if connection.is_closed() {
            return Err(CoreError::new(
                CoreErrorKind::ArgumentError,
                format!("set_connection using closed {connection}").as_str(),
            ));
        }
        if self.connection().as_ref() == Some(&connection) {
            return Err(CoreError::new(
                CoreErrorKind::ArgumentError,
                format!("{connection} is already attached").as_str(),
            ));
        }

        let reader_token = self.shared.shutdown.child_token();
        let attachment = Arc::new(Attachment {
            connection: connection.clone(),
            reader_token: reader_token.clone(),
        });
        if let Some(previous) = self.shared.current.swap(Some(attachment)) {
            debug!("Replacing {} with {connection}", previous.connection);
            previous.reader_token.cancel();
        }
        info!("Attached {connection}");

        tokio::spawn(read_loop(self.shared.clone(), connection, reader_token));
        self.shared.attached.notify_one();
        Ok(())
    }

    /// Replaces the callback invoked on every transport failure.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(IoError) + Send + Sync + 'static,
    {
        let callback: ErrorCallback = Box::new(callback);
        self.shared.on_error.store(Arc::new(callback));
    }

    /// Queues a packet for sending, waiting while the outgoing queue is full.
    pub async fn send(&self, packet: Packet) -> Result<(), CoreError> {
        if self.shared.is_closed() {
            return Err(CoreError::new(
                CoreErrorKind::StreamClosed,
                "send on a closed stream",
            ));
        }
        self.outgoing.send(packet).await?;
        Ok(())
    }

    /// A sending handle to the outgoing queue.
    pub fn outgoing(&self) -> Sender<Packet> {
        self.outgoing.clone()
    }

    /// Waits for the next inbound packet. Returns `None` once the stream is
    /// closed and no buffered packets remain.
    pub async fn recv(&self) -> Option<Packet> {
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            biased;
            packet = incoming.recv() => packet,
            _ = self.shared.shutdown.cancelled() => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stops both loops, closes and detaches the current connection and
    /// releases the queues. Later calls return immediately.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!("Stream already closed");
            return;
        }
        self.shared.shutdown.cancel();

        if let Some(attachment) = self.shared.current.load_full() {
            if let Err(e) = attachment.connection.close().await {
                error!("Failed to close {}: {e}", attachment.connection);
                self.shared.report(attachment.connection.clone(), e);
            }
        }
        self.shared.current.store(None);

        self.incoming.lock().await.close();

        if let Some(writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.await {
                error!("Writer task failed: {}", CoreError::from(e));
            }
        }
        info!("Stream closed");
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.shutdown.cancel();
    }
}

async fn read_loop(shared: Arc<StreamShared>, connection: Connection, token: CancellationToken) {
    let mut reader = tokio::select! {
        _ = token.cancelled() => return,
        reader = connection.lock_reader() => reader,
    };
    debug!("Reader started for {connection}");

    loop {
        if shared.is_closed() || token.is_cancelled() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = connection.closed() => break,
            result = Packet::read_from(&mut *reader, shared.config.max_payload_length) => result,
        };

        let packet = match result {
            Ok(packet) => packet,
            Err(e) => {
                if !shared.is_closed() && !token.is_cancelled() && !connection.is_closed() {
                    error!("Failed to read from {connection}: {e}");
                    shared.report(connection.clone(), e);
                }
                break;
            }
        };
        debug!(
            "Received packet of type {} with {} bytes from {connection}",
            packet.packet_type(),
            packet.length()
        );

        // a full queue parks the reader here until the consumer catches up
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            sent = shared.incoming.send(packet) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Reader stopped for {connection}");
}

async fn write_loop(shared: Arc<StreamShared>, mut outgoing: Receiver<Packet>) {
    loop {
        let packet = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            packet = outgoing.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };
        if !write_with_retry(&shared, &packet).await {
            break;
        }
    }
    outgoing.close();
    debug!("Writer stopped");
}

/// Writes `packet` to whatever connection is current, retrying on failure.
/// Returns `false` once the stream is closed.
async fn write_with_retry(shared: &StreamShared, packet: &Packet) -> bool {
    let mut failures = 0usize;
    loop {
        if shared.is_closed() {
            return false;
        }

        let Some(attachment) = shared.current.load_full() else {
            tokio::select! {
                _ = shared.shutdown.cancelled() => return false,
                _ = shared.attached.notified() => {}
            }
            continue;
        };
        let connection = &attachment.connection;

        let result = tokio::select! {
            _ = shared.shutdown.cancelled() => return false,
            result = connection.write_packet(packet, shared.config.max_write_size) => result,
        };

        match result {
            Ok(()) => {
                debug!(
                    "Sent packet of type {} with {} bytes to {connection}",
                    packet.packet_type(),
                    packet.length()
                );
                return true;
            }
            Err(e) => {
                if shared.is_closed() {
                    return false;
                }
                warn!("Failed to write to {connection}: {e}");
                shared.report(connection.clone(), e);
                failures += 1;
                if shared
                    .config
                    .max_write_retries
                    .is_some_and(|max_retries| failures > max_retries)
                {
                    warn!(
                        "Dropping packet of type {} after {failures} failed attempts",
                        packet.packet_type()
                    );
                    return true;
                }
                tokio::select! {
                    _ = shared.shutdown.cancelled() => return false,
                    _ = sleep(shared.config.retry_interval) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn zero_capacity_is_raised_to_one() {
        let stream = Stream::new(0);
        let (io, _peer) = tokio::io::duplex(64);
        stream.set_connection(Connection::new(io)).unwrap();

        stream.send(Packet::new(0, Bytes::from_static(b"ping"))).await.unwrap();
        stream.close().await;
    }

    #[tokio::test]
    async fn closed_connection_is_rejected_before_attaching() {
        let stream = Stream::new(4);
        let (io, _peer) = tokio::io::duplex(64);
        let connection = Connection::new(io);
        connection.close().await.unwrap();

        let err = stream.set_connection(connection).unwrap_err();

        assert_eq!(err.error_kind, CoreErrorKind::ArgumentError);
        assert!(err.message.contains("closed"));
        assert!(stream.connection().is_none());
    }

    #[tokio::test]
    async fn closed_stream_rejects_everything() {
        let stream = Stream::new(4);
        stream.close().await;
        stream.close().await;

        let (io, _peer) = tokio::io::duplex(64);
        let err = stream.set_connection(Connection::new(io)).unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::StreamClosed);

        let err = stream.send(Packet::new(0, Bytes::new())).await.unwrap_err();
        assert_eq!(err.error_kind, CoreErrorKind::StreamClosed);

        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn replacing_the_connection_updates_the_handle() {
        let stream = Stream::new(4);
        let (first_io, _first_peer) = tokio::io::duplex(64);
        let (second_io, _second_peer) = tokio::io::duplex(64);
        let first = Connection::new(first_io);
        let second = Connection::new(second_io);

        stream.set_connection(first.clone()).unwrap();
        assert_eq!(stream.connection(), Some(first));
        stream.set_connection(second.clone()).unwrap();
        assert_eq!(stream.connection(), Some(second));

        stream.close().await;
    }

    #[tokio::test]
    async fn attaching_the_current_connection_again_is_rejected() {
        let stream = Stream::new(4);
        let (io, _peer) = tokio::io::duplex(64);
        let connection = Connection::new(io);
        stream.set_connection(connection.clone()).unwrap();

        let err = stream.set_connection(connection.clone()).unwrap_err();

        assert_eq!(err.error_kind, CoreErrorKind::ArgumentError);
        assert!(err.message.contains("already attached"));
        assert_eq!(stream.connection(), Some(connection));
        stream.close().await;
    }

    #[tokio::test]
    async fn close_detaches_the_connection() {
        let stream = Stream::new(4);
        let (io, _peer) = tokio::io::duplex(64);
        stream.set_connection(Connection::new(io)).unwrap();

        stream.close().await;

        assert!(stream.connection().is_none());
    }
}
