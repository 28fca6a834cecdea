use crate::error::AppError;
use crate::server::PING;
use bytes::Bytes;
use log::{debug, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use wirestream_core::error::CoreError;
use wirestream_core::{Connection, IoError, Packet, Stream, StreamConfig, retry};

pub struct PingLimits {
    pub count: usize,
    pub interval: Duration,
    pub max_retries: usize,
    pub retry_interval: Duration,
    pub global_timeout: Duration,
}

async fn dial(addr: &str, global_timeout: Duration) -> Result<Connection, AppError> {
    let socket = timeout(global_timeout, TcpStream::connect(addr))
        .await
        .map_err(CoreError::from)??;
    Ok(Connection::from_tcp(socket))
}

/// Sends `count` pings through a [`Stream`] and waits for every reply,
/// redialing and swapping in a new connection whenever the current one fails.
pub async fn ping(
    addr: &str,
    stream_config: StreamConfig,
    limits: PingLimits,
) -> Result<(), AppError> {
    let stream = Stream::with_config(stream_config);

    // capacity one: failures reported while a reconnect is pending are dropped
    let (failure_tx, mut failure_rx) = mpsc::channel::<Connection>(1);
    stream.on_error(move |e: IoError| {
        debug!("{e}");
        let _ = failure_tx.try_send(e.connection);
    });

    let connection = retry!(
        dial(addr, limits.global_timeout).await,
        limits.max_retries,
        limits.retry_interval
    )?;
    stream.set_connection(connection)?;
    info!("Connected to {addr}");

    let mut sent = 0;
    let mut received = 0;
    let mut ticker = tokio::time::interval(limits.interval);

    while received < limits.count {
        tokio::select! {
            _ = ticker.tick(), if sent < limits.count => {
                stream.send(Packet::new(0, Bytes::from_static(PING))).await?;
                sent += 1;
            }
            reply = stream.recv() => {
                let Some(reply) = reply else {
                    break;
                };
                received += 1;
                info!(
                    "Reply {received}/{}: {}",
                    limits.count,
                    String::from_utf8_lossy(reply.payload())
                );
            }
            Some(failed) = failure_rx.recv() => {
                if stream.connection().as_ref() != Some(&failed) {
                    continue;
                }
                warn!("Lost {failed}; reconnecting to {addr}");
                if let Err(e) = failed.close().await {
                    debug!("Closing {failed} failed: {e}");
                }
                let connection = retry!(
                    dial(addr, limits.global_timeout).await,
                    limits.max_retries,
                    limits.retry_interval
                )?;
                stream.set_connection(connection)?;
                info!("Reconnected to {addr}");
            }
        }
    }

    stream.close().await;
    info!("Received {received} of {} replies", limits.count);
    Ok(())
}
