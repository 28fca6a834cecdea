use crate::error::AppError;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use wirestream_core::Packet;
use wirestream_core::codec::PacketCodec;

pub const PING: &[u8] = b"ping";
pub const PONG: &[u8] = b"pong";

/// Answers `ping` with `pong` and echoes everything else unchanged.
pub fn reply_to(packet: Packet) -> Packet {
    if packet.payload() == PING {
        Packet::new(packet.packet_type(), Bytes::from_static(PONG))
    } else {
        packet
    }
}

async fn handle_connection(socket: TcpStream) -> Result<(), AppError> {
    let mut framed = Framed::new(socket, PacketCodec::new());
    while let Some(frame) = framed.next().await {
        let packet = frame?;
        debug!(
            "Type: {}, Length: {}",
            packet.packet_type(),
            packet.length()
        );
        framed.send(reply_to(packet)).await?;
    }
    debug!("Client disconnected");
    Ok(())
}

pub async fn serve(host: &str, port: u16) -> Result<(), AppError> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    loop {
        let (socket, addr) = listener.accept().await?;
        debug!("Connection from {}", addr);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket).await {
                error!("{addr}: {e}");
            }
        });
    }
}
