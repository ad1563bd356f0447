//! Per-connection socket IO.
//!
//! Each accepted socket is split into a reader task and a writer task. The
//! reader drains the socket into a consume-buffer, decodes as many full
//! packets as possible and forwards them to the server task; any protocol
//! error or peer close ends in a single `Disconnected` event. The writer
//! drains an unbounded outbound queue, which keeps responses and fan-out in
//! FIFO order per connection.

use parlor_shared::{codec, ByteBuffer, Packet};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum ServerEvent {
    Packet { conn_id: u64, packet: Packet },
    Disconnected { conn_id: u64 },
}

/// The server task's grip on one connection. Dropping it closes the
/// outbound queue and lets the writer task run down.
#[derive(Debug)]
pub struct ConnectionHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ConnectionHandle {
    /// Queue an encoded packet for write. Errors are ignored: a closed
    /// queue means the connection is already going away.
    pub fn queue_write(&self, bytes: Vec<u8>) {
        let _ = self.outbound.send(bytes);
    }
}

pub fn spawn_connection(
    conn_id: u64,
    stream: TcpStream,
    events: mpsc::Sender<ServerEvent>,
) -> ConnectionHandle {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (mut read_half, mut write_half) = stream.into_split();

    let writer_events = events.clone();
    tokio::spawn(async move {
        while let Some(bytes) = outbound_rx.recv().await {
            if let Err(e) = write_half.write_all(&bytes).await {
                tracing::debug!(conn_id, error = %e, "write failed");
                let _ = writer_events
                    .send(ServerEvent::Disconnected { conn_id })
                    .await;
                return;
            }
        }
        // Queue closed: the server already dropped this connection.
    });

    tokio::spawn(async move {
        let mut buffer = ByteBuffer::new();
        let mut chunk = [0u8; 4096];
        'io: loop {
            match read_half.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    buffer.append(&chunk[..n]);
                    loop {
                        match codec::decode(&mut buffer) {
                            Ok(Some(packet)) => {
                                if events
                                    .send(ServerEvent::Packet { conn_id, packet })
                                    .await
                                    .is_err()
                                {
                                    return;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!(conn_id, error = %e, "protocol error");
                                break 'io;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(conn_id, error = %e, "read failed");
                    break;
                }
            }
        }
        let _ = events.send(ServerEvent::Disconnected { conn_id }).await;
    });

    ConnectionHandle {
        outbound: outbound_tx,
    }
}
