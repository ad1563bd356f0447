//! The connection multiplexer and session router.
//!
//! One task owns everything mutable: the database, the session registry and
//! the outbound handles of all live connections. Per-connection reader
//! tasks feed decoded packets into this task's event channel, so there is
//! no locking anywhere in the request path and the row store is only ever
//! touched from here.

use std::collections::HashMap;

use parlor_shared::config::ServerConfig;
use parlor_shared::files::ensure_dir;
use parlor_shared::meta::UserListMeta;
use parlor_shared::{codec, Packet, PacketType};
use parlor_store::Database;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::connection::{spawn_connection, ConnectionHandle, ServerEvent};
use crate::error::ServerError;
use crate::services::file::FileStore;
use crate::session::SessionRegistry;

const EVENT_QUEUE_DEPTH: usize = 1024;

pub struct ChatServer {
    pub(crate) config: ServerConfig,
    pub(crate) db: Database,
    pub(crate) files: FileStore,
    pub(crate) sessions: SessionRegistry,
    pub(crate) connections: HashMap<u64, ConnectionHandle>,
    next_conn_id: u64,
    events_tx: mpsc::Sender<ServerEvent>,
    events_rx: Option<mpsc::Receiver<ServerEvent>>,
}

impl ChatServer {
    /// Open the database, run migrations and prepare the storage
    /// directories. Network setup happens in [`ChatServer::run`].
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        ensure_dir(&config.data_dir)?;
        let db = Database::open_at(&config.db_path)?;
        let files = FileStore::new(&config.data_dir, config.file_chunk_size);
        files.ensure_storage()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        Ok(Self {
            config,
            db,
            files,
            sessions: SessionRegistry::new(),
            connections: HashMap::new(),
            next_conn_id: 1,
            events_tx,
            events_rx: Some(events_rx),
        })
    }

    /// Accept connections and dispatch events until the process is stopped.
    pub async fn run(mut self, listener: TcpListener) {
        let mut events_rx = self.events_rx.take().expect("run is called once");
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr),
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },
                event = events_rx.recv() => match event {
                    Some(ServerEvent::Packet { conn_id, packet }) => {
                        self.handle_packet(conn_id, packet);
                    }
                    Some(ServerEvent::Disconnected { conn_id }) => {
                        self.disconnect(conn_id);
                    }
                    // Unreachable while we hold a sender.
                    None => break,
                },
            }
        }
    }

    fn accept(&mut self, stream: TcpStream, addr: std::net::SocketAddr) {
        if self.connections.len() >= self.config.max_clients {
            tracing::warn!(%addr, "connection limit reached, dropping client");
            return;
        }
        if let Err(e) = configure_socket(&stream) {
            tracing::warn!(%addr, error = %e, "failed to configure client socket");
            return;
        }

        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;

        let handle = spawn_connection(conn_id, stream, self.events_tx.clone());
        self.connections.insert(conn_id, handle);
        self.sessions.add_connection(conn_id);
        tracing::info!(conn_id, %addr, "client connected");
    }

    pub(crate) fn disconnect(&mut self, conn_id: u64) {
        // Reader and writer may both report; only act once.
        if self.connections.remove(&conn_id).is_none() {
            return;
        }
        self.sessions.remove_connection(conn_id);
        tracing::info!(conn_id, "client disconnected");
        self.broadcast_user_list();
    }

    pub(crate) fn queue_packet(&self, conn_id: u64, packet: &Packet) {
        if let Some(handle) = self.connections.get(&conn_id) {
            handle.queue_write(codec::encode(packet));
        }
    }

    /// Push the current online-user snapshot to every logged-in connection.
    pub(crate) fn broadcast_user_list(&self) {
        let meta = UserListMeta {
            users: self.sessions.online_users(),
        };
        let meta_json = serde_json::to_string(&meta).unwrap_or_default();
        let packet = Packet::new(PacketType::UserListUpdate, 0, meta_json);
        let bytes = codec::encode(&packet);
        for (conn_id, handle) in &self.connections {
            if self.sessions.is_logged_in(*conn_id) {
                handle.queue_write(bytes.clone());
            }
        }
    }
}

fn configure_socket(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    socket2::SockRef::from(stream).set_keepalive(true)
}
