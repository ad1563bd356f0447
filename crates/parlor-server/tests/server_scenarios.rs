//! End-to-end scenarios over a real TCP socket: register/login/presence,
//! offline replay, duplicate login, resumable upload and ranged download.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use parlor_server::ChatServer;
use parlor_shared::config::ServerConfig;
use parlor_shared::hash::sha256_hex;
use parlor_shared::{codec, ByteBuffer, Packet, PacketType};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: std::net::SocketAddr,
    _dir: tempfile::TempDir,
}

async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        bind_host: "127.0.0.1".into(),
        port: 1,
        data_dir: dir.path().join("data"),
        db_path: dir.path().join("parlor.db"),
        log_level: "warn".into(),
        max_clients: 16,
        history_page_size: 100,
        file_chunk_size: 65536,
    };
    let server = ChatServer::new(config).expect("server init");
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server.run(listener));
    TestServer { addr, _dir: dir }
}

struct TestClient {
    stream: TcpStream,
    buffer: ByteBuffer,
}

impl TestClient {
    async fn connect(server: &TestServer) -> Self {
        let stream = TcpStream::connect(server.addr).await.unwrap();
        Self {
            stream,
            buffer: ByteBuffer::new(),
        }
    }

    async fn send(&mut self, packet_type: PacketType, request_id: u64, meta: Value) {
        self.send_with_binary(packet_type, request_id, meta, Vec::new())
            .await;
    }

    async fn send_with_binary(
        &mut self,
        packet_type: PacketType,
        request_id: u64,
        meta: Value,
        binary: Vec<u8>,
    ) {
        let packet = Packet::with_binary(packet_type, request_id, meta.to_string(), binary);
        self.stream
            .write_all(&codec::encode(&packet))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Packet {
        loop {
            if let Some(packet) = codec::decode(&mut self.buffer).unwrap() {
                return packet;
            }
            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(RECV_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for packet")
                .expect("read failed");
            assert!(n > 0, "server closed the connection");
            self.buffer.append(&chunk[..n]);
        }
    }

    /// Next packet that is not a `UserListUpdate` push; other clients
    /// logging in or out interleaves those with responses.
    async fn recv_response(&mut self) -> Packet {
        loop {
            let packet = self.recv().await;
            if packet.packet_type() != Some(PacketType::UserListUpdate) {
                return packet;
            }
        }
    }

    async fn register(&mut self, user_id: &str, nickname: &str, password: &str) {
        self.send(
            PacketType::AuthRegister,
            1,
            json!({ "user_id": user_id, "nickname": nickname, "password": password }),
        )
        .await;
        let reply = self.recv().await;
        assert_eq!(reply.packet_type(), Some(PacketType::AuthOk));
        let meta = meta_of(&reply);
        assert_eq!(meta["registered"], json!(true));
        assert_eq!(meta["logged_in"], json!(false));
    }

    /// Log in and consume the AuthOk plus the UserListUpdate that follows.
    async fn login(&mut self, user_id: &str, password: &str) -> Value {
        self.send(
            PacketType::AuthLogin,
            2,
            json!({ "user_id": user_id, "password": password }),
        )
        .await;
        let reply = self.recv().await;
        assert_eq!(reply.packet_type(), Some(PacketType::AuthOk));
        let meta = meta_of(&reply);
        assert_eq!(meta["logged_in"], json!(true));

        let push = self.recv().await;
        assert_eq!(push.packet_type(), Some(PacketType::UserListUpdate));
        assert_eq!(push.request_id, 0);
        meta
    }
}

fn meta_of(packet: &Packet) -> Value {
    serde_json::from_str(&packet.meta_json).unwrap()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn register_login_presence() {
    let server = start_server().await;
    let mut alice = TestClient::connect(&server).await;

    alice.register("alice", "Alice", "pw").await;
    let auth_ok = alice.login("alice", "pw").await;

    assert_eq!(auth_ok["user_id"], json!("alice"));
    assert_eq!(auth_ok["nickname"], json!("Alice"));
    let online = auth_ok["online_users"].as_array().unwrap();
    assert!(online.iter().any(|u| u["user_id"] == json!("alice")));
}

#[tokio::test]
async fn offline_message_replays_exactly_once() {
    let server = start_server().await;

    let mut alice = TestClient::connect(&server).await;
    alice.register("alice", "Alice", "pw").await;
    alice.register("bob", "Bob", "pw").await;
    alice.login("alice", "pw").await;

    alice
        .send(
            PacketType::MessageSend,
            7,
            json!({ "conversation_type": "private", "conversation_id": "bob", "content": "hi" }),
        )
        .await;
    let ack = alice.recv().await;
    assert_eq!(ack.packet_type(), Some(PacketType::MessageSend));
    assert_eq!(ack.request_id, 7);
    let ack_meta = meta_of(&ack);
    assert_eq!(ack_meta["status"], json!("ok"));
    let message_id = ack_meta["message_id"].as_i64().unwrap();
    let created_at = ack_meta["created_at"].as_i64().unwrap();

    // Bob logs in later and receives the pending message before anything else.
    let mut bob = TestClient::connect(&server).await;
    bob.login("bob", "pw").await;
    let deliver = bob.recv().await;
    assert_eq!(deliver.packet_type(), Some(PacketType::MessageDeliver));
    assert_eq!(deliver.request_id, 0);
    let deliver_meta = meta_of(&deliver);
    assert_eq!(deliver_meta["message_id"], json!(message_id));
    assert_eq!(deliver_meta["sender_id"], json!("alice"));
    assert_eq!(deliver_meta["content"], json!("hi"));
    assert_eq!(deliver_meta["created_at"], json!(created_at));

    // A second login must not replay it: the next packet after the login
    // sequence is the history response, not a MessageDeliver.
    drop(bob);
    // Give the server a beat to observe the disconnect, otherwise the
    // relogin races the single-session guard.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut bob = TestClient::connect(&server).await;
    bob.login("bob", "pw").await;
    bob.send(
        PacketType::HistoryFetch,
        9,
        json!({ "conversation_type": "private", "conversation_id": "alice", "before_message_id": 0, "limit": 10 }),
    )
    .await;
    let next = bob.recv().await;
    assert_eq!(next.packet_type(), Some(PacketType::HistoryResponse));
    let history = meta_of(&next);
    assert_eq!(history["status"], json!("ok"));
    assert_eq!(history["count"], json!(1));
    assert_eq!(history["messages"][0]["content"], json!("hi"));
}

#[tokio::test]
async fn duplicate_login_is_rejected() {
    let server = start_server().await;

    let mut first = TestClient::connect(&server).await;
    first.register("alice", "Alice", "pw").await;
    first.login("alice", "pw").await;

    let mut second = TestClient::connect(&server).await;
    second
        .send(
            PacketType::AuthLogin,
            2,
            json!({ "user_id": "alice", "password": "pw" }),
        )
        .await;
    let reply = second.recv().await;
    assert_eq!(reply.packet_type(), Some(PacketType::AuthError));
    let meta = meta_of(&reply);
    assert_eq!(meta["code"], json!("LOGIN_FAILED"));
    assert!(meta["message"].as_str().unwrap().contains("already online"));

    // The first session is unaffected.
    first
        .send(
            PacketType::MessageSend,
            3,
            json!({ "conversation_type": "private", "conversation_id": "alice", "content": "self" }),
        )
        .await;
    let ack = first.recv().await;
    assert_eq!(ack.packet_type(), Some(PacketType::MessageSend));
    assert_eq!(meta_of(&ack)["status"], json!("ok"));
}

#[tokio::test]
async fn resumable_upload_then_download() {
    let server = start_server().await;
    let data = payload(200_000);
    let sha256 = sha256_hex(&data);

    let mut alice = TestClient::connect(&server).await;
    alice.register("alice", "Alice", "pw").await;
    alice.register("bob", "Bob", "pw").await;
    alice.login("alice", "pw").await;

    // Offer and stream the first three chunks.
    alice
        .send(
            PacketType::FileOffer,
            10,
            json!({
                "conversation_type": "private", "conversation_id": "bob",
                "file_name": "big.bin", "file_size": data.len(), "sha256": sha256,
            }),
        )
        .await;
    let accept = alice.recv().await;
    assert_eq!(accept.packet_type(), Some(PacketType::FileAccept));
    let accept_meta = meta_of(&accept);
    assert_eq!(accept_meta["status"], json!("ok"));
    assert_eq!(accept_meta["next_offset"], json!(0));
    assert_eq!(accept_meta["chunk_size"], json!(65536));
    let file_id = accept_meta["file_id"].as_str().unwrap().to_owned();

    for i in 0..3u64 {
        let offset = (i * 65536) as usize;
        alice
            .send_with_binary(
                PacketType::FileUploadChunk,
                10,
                json!({ "file_id": file_id, "offset": offset }),
                data[offset..offset + 65536].to_vec(),
            )
            .await;
        let ack = alice.recv().await;
        let ack_meta = meta_of(&ack);
        assert_eq!(ack_meta["status"], json!("ok"));
        assert_eq!(ack_meta["next_offset"], json!(offset + 65536));
    }

    // Connection lost mid-upload; a fresh session resumes with the same id.
    drop(alice);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut alice = TestClient::connect(&server).await;
    alice.login("alice", "pw").await;
    alice
        .send(
            PacketType::FileOffer,
            20,
            json!({
                "conversation_type": "private", "conversation_id": "bob",
                "file_name": "big.bin", "file_size": data.len(), "sha256": sha256,
                "file_id": file_id,
            }),
        )
        .await;
    let accept = alice.recv().await;
    let accept_meta = meta_of(&accept);
    assert_eq!(accept_meta["status"], json!("ok"));
    assert_eq!(accept_meta["next_offset"], json!(196_608));

    alice
        .send_with_binary(
            PacketType::FileUploadChunk,
            20,
            json!({ "file_id": file_id, "offset": 196_608 }),
            data[196_608..].to_vec(),
        )
        .await;
    let ack = alice.recv().await;
    assert_eq!(meta_of(&ack)["next_offset"], json!(data.len()));

    alice
        .send(PacketType::FileUploadDone, 20, json!({ "file_id": file_id }))
        .await;
    let done = alice.recv().await;
    assert_eq!(done.packet_type(), Some(PacketType::FileDone));
    let done_meta = meta_of(&done);
    assert_eq!(done_meta["status"], json!("ok"));
    assert_eq!(done_meta["sha256"], json!(sha256));

    // Bob was offline the whole time: the notice replays at login.
    let mut bob = TestClient::connect(&server).await;
    bob.login("bob", "pw").await;
    let notice = bob.recv().await;
    assert_eq!(notice.packet_type(), Some(PacketType::FileDone));
    assert_eq!(notice.request_id, 0);
    let notice_meta = meta_of(&notice);
    assert_eq!(notice_meta["file_id"], json!(file_id));
    assert_eq!(notice_meta["file_size"], json!(data.len()));

    // Ranged download until done, then verify content end to end.
    let mut fetched = Vec::new();
    loop {
        bob.send(
            PacketType::FileDownloadRequest,
            30,
            json!({ "file_id": file_id, "offset": fetched.len() }),
        )
        .await;
        let chunk = bob.recv().await;
        assert_eq!(chunk.packet_type(), Some(PacketType::FileDownloadChunk));
        let chunk_meta = meta_of(&chunk);
        assert_eq!(chunk_meta["offset"], json!(fetched.len()));
        fetched.extend_from_slice(&chunk.binary);
        if chunk_meta["done"].as_bool().unwrap() {
            break;
        }
    }
    assert_eq!(fetched.len(), data.len());
    assert_eq!(sha256_hex(&fetched), sha256);
}

#[tokio::test]
async fn sha_mismatch_blocks_publication() {
    let server = start_server().await;
    let data = payload(1000);

    let mut alice = TestClient::connect(&server).await;
    alice.register("alice", "Alice", "pw").await;
    alice.register("bob", "Bob", "pw").await;
    alice.login("alice", "pw").await;

    alice
        .send(
            PacketType::FileOffer,
            10,
            json!({
                "conversation_type": "private", "conversation_id": "bob",
                "file_name": "bad.bin", "file_size": data.len(),
                "sha256": "0".repeat(64),
            }),
        )
        .await;
    let accept_meta = meta_of(&alice.recv().await);
    let file_id = accept_meta["file_id"].as_str().unwrap().to_owned();

    alice
        .send_with_binary(
            PacketType::FileUploadChunk,
            10,
            json!({ "file_id": file_id, "offset": 0 }),
            data.clone(),
        )
        .await;
    assert_eq!(meta_of(&alice.recv().await)["status"], json!("ok"));

    alice
        .send(PacketType::FileUploadDone, 10, json!({ "file_id": file_id }))
        .await;
    let reply = alice.recv().await;
    assert_eq!(reply.packet_type(), Some(PacketType::FileUploadDone));
    let reply_meta = meta_of(&reply);
    assert_eq!(reply_meta["code"], json!("FINALIZE_FAILED"));
    assert!(reply_meta["message"]
        .as_str()
        .unwrap()
        .contains("sha256 mismatch"));

    // No FileDone reaches bob, and the file stays locked behind the
    // retained upload row.
    let mut bob = TestClient::connect(&server).await;
    bob.login("bob", "pw").await;
    bob.send(
        PacketType::FileDownloadRequest,
        11,
        json!({ "file_id": file_id, "offset": 0 }),
    )
    .await;
    let reply = bob.recv().await;
    assert_eq!(reply.packet_type(), Some(PacketType::FileDownloadRequest));
    assert_eq!(meta_of(&reply)["code"], json!("FILE_STILL_UPLOADING"));
}

#[tokio::test]
async fn group_dissolve_cuts_off_former_members() {
    let server = start_server().await;

    let mut alice = TestClient::connect(&server).await;
    alice.register("alice", "Alice", "pw").await;
    alice.register("bob", "Bob", "pw").await;
    alice.login("alice", "pw").await;

    alice
        .send(PacketType::GroupCreate, 5, json!({ "name": "rustaceans" }))
        .await;
    let created = meta_of(&alice.recv_response().await);
    assert_eq!(created["status"], json!("ok"));
    let group_id = created["group_id"].as_str().unwrap().to_owned();

    let mut bob = TestClient::connect(&server).await;
    bob.login("bob", "pw").await;
    bob.send(PacketType::GroupJoin, 6, json!({ "group_id": group_id }))
        .await;
    assert_eq!(meta_of(&bob.recv_response().await)["status"], json!("ok"));

    alice
        .send(
            PacketType::MessageSend,
            7,
            json!({ "conversation_type": "group", "conversation_id": group_id, "content": "hello group" }),
        )
        .await;
    assert_eq!(meta_of(&alice.recv_response().await)["status"], json!("ok"));
    // Bob is online: the group message arrives as a push.
    let deliver = bob.recv_response().await;
    assert_eq!(deliver.packet_type(), Some(PacketType::MessageDeliver));

    alice
        .send(
            PacketType::GroupAdmin,
            8,
            json!({ "action": "dissolve", "group_id": group_id }),
        )
        .await;
    assert_eq!(meta_of(&alice.recv_response().await)["status"], json!("ok"));

    // Former members are cut off and the history is gone.
    bob.send(
        PacketType::MessageSend,
        9,
        json!({ "conversation_type": "group", "conversation_id": group_id, "content": "anyone?" }),
    )
    .await;
    assert_eq!(meta_of(&bob.recv_response().await)["code"], json!("NOT_IN_GROUP"));

    bob.send(
        PacketType::HistoryFetch,
        10,
        json!({ "conversation_type": "group", "conversation_id": group_id, "before_message_id": 0, "limit": 10 }),
    )
    .await;
    assert_eq!(
        meta_of(&bob.recv_response().await)["code"],
        json!("NOT_IN_GROUP")
    );
}
