//! Client network endpoint.
//!
//! One background tokio task owns the socket: it drains an outbound command
//! channel and appends decoded inbound packets to a mutex-guarded deque that
//! the UI thread polls once per frame. The task exits on any fatal error,
//! clearing `running`; reconnecting is the caller's job (stop, connect_to,
//! start, then re-login and resume transfers).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use parlor_shared::{codec, ByteBuffer, Packet, PacketType};
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ClientError;

/// The seam the request API and the transfer coordinator talk through;
/// lets tests substitute a recording endpoint.
pub trait Transport {
    /// Monotonically increasing, starting at 1. Assigned before the first
    /// byte of the request is queued.
    fn next_request_id(&self) -> u64;

    fn send_packet(
        &self,
        packet_type: PacketType,
        request_id: u64,
        meta_json: String,
        binary: Option<&[u8]>,
    ) -> Result<(), ClientError>;

    fn send_json<M: Serialize>(
        &self,
        packet_type: PacketType,
        request_id: u64,
        meta: &M,
        binary: Option<&[u8]>,
    ) -> Result<(), ClientError>
    where
        Self: Sized,
    {
        let meta_json = serde_json::to_string(meta)?;
        self.send_packet(packet_type, request_id, meta_json, binary)
    }
}

enum Command {
    Send(Vec<u8>),
    Shutdown,
}

#[derive(Default)]
pub struct NetClient {
    stream: Option<TcpStream>,
    command_tx: Option<mpsc::UnboundedSender<Command>>,
    command_rx: Option<mpsc::UnboundedReceiver<Command>>,
    incoming: Arc<Mutex<VecDeque<Packet>>>,
    running: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
    next_request_id: AtomicU64,
    task: Option<JoinHandle<()>>,
}

impl NetClient {
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    /// Establish the TCP connection. Packets may be queued immediately;
    /// they are flushed once [`NetClient::start`] spawns the loop.
    pub async fn connect_to(&mut self, host: &str, port: u16) -> Result<(), ClientError> {
        if self.stream.is_some() || self.command_tx.is_some() {
            return Err(ClientError::AlreadyConnected);
        }
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        socket2::SockRef::from(&stream).set_keepalive(true)?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.stream = Some(stream);
        self.command_tx = Some(command_tx);
        self.command_rx = Some(command_rx);
        *self.last_error.lock().unwrap() = None;
        Ok(())
    }

    pub fn start(&mut self) {
        let (Some(stream), Some(command_rx)) = (self.stream.take(), self.command_rx.take()) else {
            return;
        };
        self.running.store(true, Ordering::SeqCst);
        self.task = Some(tokio::spawn(run_loop(
            stream,
            command_rx,
            Arc::clone(&self.incoming),
            Arc::clone(&self.running),
            Arc::clone(&self.last_error),
        )));
    }

    /// Cooperative shutdown: the loop observes the command, drops the
    /// socket, and is joined before this returns.
    pub async fn stop(&mut self) {
        if let Some(command_tx) = self.command_tx.take() {
            let _ = command_tx.send(Command::Shutdown);
        }
        self.command_rx = None;
        self.stream = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Non-blocking pop of the next inbound packet.
    pub fn poll_packet(&self) -> Option<Packet> {
        self.incoming.lock().unwrap().pop_front()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }
}

impl Transport for NetClient {
    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn send_packet(
        &self,
        packet_type: PacketType,
        request_id: u64,
        meta_json: String,
        binary: Option<&[u8]>,
    ) -> Result<(), ClientError> {
        let command_tx = self.command_tx.as_ref().ok_or(ClientError::NotConnected)?;
        let packet = Packet::with_binary(
            packet_type,
            request_id,
            meta_json,
            binary.map(<[u8]>::to_vec).unwrap_or_default(),
        );
        command_tx
            .send(Command::Send(codec::encode(&packet)))
            .map_err(|_| ClientError::ConnectionClosed)
    }
}


async fn run_loop(
    stream: TcpStream,
    mut commands: mpsc::UnboundedReceiver<Command>,
    incoming: Arc<Mutex<VecDeque<Packet>>>,
    running: Arc<AtomicBool>,
    last_error: Arc<Mutex<Option<String>>>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut buffer = ByteBuffer::new();
    let mut chunk = [0u8; 4096];

    let fail = |message: String| {
        tracing::warn!(error = %message, "client network error");
        *last_error.lock().unwrap() = Some(message);
    };

    'io: loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(bytes)) => {
                    if let Err(e) = write_half.write_all(&bytes).await {
                        fail(format!("send failed: {e}"));
                        break 'io;
                    }
                }
                Some(Command::Shutdown) | None => break 'io,
            },
            read = read_half.read(&mut chunk) => match read {
                Ok(0) => {
                    fail("server closed".to_owned());
                    break 'io;
                }
                Ok(n) => {
                    buffer.append(&chunk[..n]);
                    loop {
                        match codec::decode(&mut buffer) {
                            Ok(Some(packet)) => {
                                incoming.lock().unwrap().push_back(packet);
                            }
                            Ok(None) => break,
                            Err(e) => {
                                fail(e.to_string());
                                break 'io;
                            }
                        }
                    }
                }
                Err(e) => {
                    fail(format!("recv failed: {e}"));
                    break 'io;
                }
            },
        }
    }
    running.store(false, Ordering::SeqCst);
}
