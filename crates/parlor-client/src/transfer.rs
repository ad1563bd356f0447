//! Upload/download state machines for resumable file transfer.
//!
//! Uploads move `pending-offer -> accepted -> chunking -> finalized` in
//! lockstep with server acks: one chunk in flight, the next sent only once
//! the previous ack lands. Downloads pull ranged chunks into a `.part`
//! file, verify the SHA-256 on completion and only then rename into place.
//! Both survive reconnects through [`FileTransferManager::resume_transfers`].

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parlor_shared::files::{ensure_dir, sanitize_file_name};
use parlor_shared::hash::sha256_hex_file;
use parlor_shared::meta::{
    DownloadChunkMeta, DownloadRequestMeta, FileAcceptMeta, FileChunkMeta, FileIdMeta,
    FileOfferMeta, StatusMeta, UploadAckMeta,
};
use parlor_shared::{Packet, PacketType};

use crate::error::ClientError;
use crate::net::Transport;

/// Progress snapshot surfaced to the UI.
#[derive(Debug, Clone, Default)]
pub struct TransferState {
    pub file_id: String,
    pub file_name: String,
    pub total_size: i64,
    pub transferred: i64,
    pub done: bool,
    pub failed: bool,
}

impl TransferState {
    pub fn progress(&self) -> f64 {
        if self.total_size <= 0 {
            return 0.0;
        }
        (self.transferred as f64 / self.total_size as f64).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub conversation_type: String,
    pub conversation_id: String,
    pub file_path: PathBuf,
    /// Set when re-offering an interrupted upload.
    pub file_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub file_id: String,
    pub conversation_type: String,
    pub conversation_id: String,
    pub file_name: String,
    pub sha256: String,
    pub file_size: i64,
}

#[derive(Debug)]
struct UploadTask {
    request_id: u64,
    file_id: String,
    conversation_type: String,
    conversation_id: String,
    file_path: PathBuf,
    file_name: String,
    sha256: String,
    file_size: i64,
    next_offset: i64,
    chunk_size: i64,
    stream: Option<File>,
    done: bool,
    failed: bool,
}

impl UploadTask {
    /// Copy without the open stream; re-offers always reopen the source.
    fn detached_copy(&self) -> UploadTask {
        UploadTask {
            request_id: self.request_id,
            file_id: self.file_id.clone(),
            conversation_type: self.conversation_type.clone(),
            conversation_id: self.conversation_id.clone(),
            file_path: self.file_path.clone(),
            file_name: self.file_name.clone(),
            sha256: self.sha256.clone(),
            file_size: self.file_size,
            next_offset: self.next_offset,
            chunk_size: self.chunk_size,
            stream: None,
            done: self.done,
            failed: self.failed,
        }
    }
}

#[derive(Debug, Clone)]
struct DownloadTask {
    file_id: String,
    file_name: String,
    sha256: String,
    file_size: i64,
    next_offset: i64,
    temp_path: PathBuf,
    final_path: PathBuf,
    done: bool,
    failed: bool,
}

#[derive(Default)]
pub struct FileTransferManager {
    data_dir: PathBuf,
    /// Offers awaiting FileAccept, keyed by offer request id.
    pending_offers: HashMap<u64, UploadTask>,
    /// Active uploads keyed by server-assigned file id.
    uploads: HashMap<String, UploadTask>,
    upload_request_map: HashMap<u64, String>,
    downloads: HashMap<String, DownloadTask>,
    download_request_map: HashMap<u64, String>,
    upload_states: HashMap<String, TransferState>,
    download_states: HashMap<String, TransferState>,
    last_error: Option<String>,
}

impl FileTransferManager {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    pub fn upload_states(&self) -> &HashMap<String, TransferState> {
        &self.upload_states
    }

    pub fn download_states(&self) -> &HashMap<String, TransferState> {
        &self.download_states
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Hash the source file and send the offer. The task parks in the
    /// pending-offer table until the server's FileAccept promotes it.
    pub fn begin_upload<T: Transport>(
        &mut self,
        net: &T,
        request: &UploadRequest,
    ) -> Result<u64, ClientError> {
        if request.conversation_type.is_empty() || request.conversation_id.is_empty() {
            return Err(ClientError::MissingConversation);
        }
        if request.file_path.as_os_str().is_empty() {
            return Err(ClientError::MissingFilePath);
        }

        let file_size = std::fs::metadata(&request.file_path)?.len() as i64;
        if file_size == 0 {
            return Err(ClientError::EmptyFile);
        }
        let sha256 = sha256_hex_file(&request.file_path)?;
        let file_name = request
            .file_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unknown")
            .to_owned();

        let request_id = net.next_request_id();
        send_file_offer(
            net,
            &request.conversation_type,
            &request.conversation_id,
            &file_name,
            file_size,
            &sha256,
            &request.file_id,
            request_id,
        )?;

        self.pending_offers.insert(
            request_id,
            UploadTask {
                request_id,
                file_id: request.file_id.clone(),
                conversation_type: request.conversation_type.clone(),
                conversation_id: request.conversation_id.clone(),
                file_path: request.file_path.clone(),
                file_name,
                sha256,
                file_size,
                next_offset: 0,
                chunk_size: 0,
                stream: None,
                done: false,
                failed: false,
            },
        );
        Ok(request_id)
    }

    /// Prepare the temp file (adopting a partial one when its size fits)
    /// and request the first chunk.
    pub fn begin_download<T: Transport>(
        &mut self,
        net: &T,
        request: &DownloadRequest,
    ) -> Result<u64, ClientError> {
        if request.file_id.is_empty() {
            return Err(ClientError::MissingFileId);
        }
        if request.file_size <= 0 {
            return Err(ClientError::InvalidFileSize);
        }
        if request.sha256.is_empty() {
            return Err(ClientError::MissingSha256);
        }

        let dir = self.download_dir(&request.conversation_type, &request.conversation_id);
        ensure_dir(&dir)?;

        let safe_name = sanitize_file_name(&request.file_name);
        let final_path = dir.join(format!("{}_{}", request.file_id, safe_name));
        let temp_path = dir.join(format!("{}_{}.part", request.file_id, safe_name));

        let mut next_offset = 0i64;
        if let Ok(existing) = std::fs::metadata(&temp_path).map(|m| m.len() as i64) {
            if existing > 0 && existing < request.file_size {
                next_offset = existing;
            }
        }
        if next_offset == 0 {
            File::create(&temp_path)?;
        }

        let task = DownloadTask {
            file_id: request.file_id.clone(),
            file_name: request.file_name.clone(),
            sha256: request.sha256.clone(),
            file_size: request.file_size,
            next_offset,
            temp_path,
            final_path,
            done: false,
            failed: false,
        };
        self.download_states.insert(
            task.file_id.clone(),
            TransferState {
                file_id: task.file_id.clone(),
                file_name: task.file_name.clone(),
                total_size: task.file_size,
                transferred: task.next_offset,
                done: false,
                failed: false,
            },
        );

        self.downloads.insert(task.file_id.clone(), task.clone());

        let request_id = net.next_request_id();
        self.send_download_request(net, &task, request_id)?;
        Ok(request_id)
    }

    /// Re-drive every unfinished transfer after a reconnect: pending and
    /// active uploads are re-offered with their known file ids (the server
    /// answers with the authoritative next offset), downloads re-request at
    /// their current offset. The download correlation table is dropped
    /// wholesale, so a chunk that raced the disconnect is ignored.
    pub fn resume_transfers<T: Transport>(&mut self, net: &T) -> Result<(), ClientError> {
        self.download_request_map.clear();

        let parked: Vec<UploadTask> = self
            .pending_offers
            .drain()
            .map(|(_, task)| task)
            .collect();
        for mut task in parked {
            if task.failed || task.done {
                continue;
            }
            let request_id = net.next_request_id();
            send_file_offer(
                net,
                &task.conversation_type,
                &task.conversation_id,
                &task.file_name,
                task.file_size,
                &task.sha256,
                &task.file_id,
                request_id,
            )?;
            task.request_id = request_id;
            task.stream = None;
            self.pending_offers.insert(request_id, task);
        }

        let active: Vec<String> = self.uploads.keys().cloned().collect();
        for file_id in active {
            let Some(task) = self.uploads.get_mut(&file_id) else {
                continue;
            };
            if task.failed || task.done {
                continue;
            }
            let request_id = net.next_request_id();
            task.request_id = request_id;
            task.stream = None;
            let parked = task.detached_copy();
            self.erase_upload_mapping(&file_id);
            send_file_offer(
                net,
                &parked.conversation_type,
                &parked.conversation_id,
                &parked.file_name,
                parked.file_size,
                &parked.sha256,
                &parked.file_id,
                request_id,
            )?;
            self.pending_offers.insert(request_id, parked);
        }

        let open_downloads: Vec<DownloadTask> = self
            .downloads
            .values()
            .filter(|task| !task.failed && !task.done)
            .cloned()
            .collect();
        for task in open_downloads {
            let request_id = net.next_request_id();
            self.send_download_request(net, &task, request_id)?;
        }
        Ok(())
    }

    /// Apply a file-subsystem packet. Returns false when the packet is not
    /// file-related and should be handled elsewhere.
    pub fn handle_packet<T: Transport>(&mut self, net: &T, packet: &Packet) -> bool {
        let packet_type = match packet.packet_type() {
            Some(
                t @ (PacketType::FileOffer
                | PacketType::FileAccept
                | PacketType::FileUploadChunk
                | PacketType::FileUploadDone
                | PacketType::FileDownloadRequest
                | PacketType::FileDownloadChunk
                | PacketType::FileDone),
            ) => t,
            _ => return false,
        };

        let status: StatusMeta = match serde_json::from_str(&packet.meta_json) {
            Ok(status) => status,
            Err(e) => {
                self.last_error = Some(format!("invalid json: {e}"));
                return true;
            }
        };

        if !status.is_ok() {
            let message = status
                .message
                .unwrap_or_else(|| "request failed".to_owned());
            match packet_type {
                // A rejected offer: a resume attempt fails its upload, a
                // fresh offer just surfaces the error.
                PacketType::FileOffer => {
                    if let Some(task) = self.pending_offers.remove(&packet.request_id) {
                        if !task.file_id.is_empty() {
                            self.mark_upload_failed(&task.file_id, &message);
                        } else {
                            self.last_error = Some(message);
                        }
                    } else {
                        self.last_error = Some(message);
                    }
                    return true;
                }
                PacketType::FileUploadDone => {
                    if let Some(file_id) = self.upload_request_map.get(&packet.request_id).cloned()
                    {
                        self.mark_upload_failed(&file_id, &message);
                        self.erase_upload_mapping(&file_id);
                    } else {
                        self.last_error = Some(message);
                    }
                    return true;
                }
                PacketType::FileDownloadRequest => {
                    if let Some(file_id) =
                        self.download_request_map.remove(&packet.request_id)
                    {
                        self.mark_download_failed(&file_id, &message);
                    } else {
                        self.last_error = Some(message);
                    }
                    return true;
                }
                _ => {}
            }
        }

        match packet_type {
            PacketType::FileAccept => self.handle_file_accept(net, packet),
            PacketType::FileUploadChunk => self.handle_upload_ack(net, packet),
            PacketType::FileDownloadChunk => self.handle_download_chunk(net, packet),
            PacketType::FileDone => {
                let meta: FileIdMeta =
                    serde_json::from_str(&packet.meta_json).unwrap_or_default();
                if let Some(task) = self.uploads.get_mut(&meta.file_id) {
                    task.done = true;
                    task.stream = None;
                    if let Some(state) = self.upload_states.get_mut(&meta.file_id) {
                        state.done = true;
                        state.transferred = task.file_size;
                    }
                    self.erase_upload_mapping(&meta.file_id);
                }
                true
            }
            _ => false,
        }
    }

    fn handle_file_accept<T: Transport>(&mut self, net: &T, packet: &Packet) -> bool {
        let meta: FileAcceptMeta = serde_json::from_str(&packet.meta_json).unwrap_or_default();
        if !meta.status.is_empty() && meta.status != "ok" {
            self.pending_offers.remove(&packet.request_id);
            self.last_error =
                Some(meta.message.unwrap_or_else(|| "file accept failed".to_owned()));
            return true;
        }

        let Some(mut task) = self.pending_offers.remove(&packet.request_id) else {
            return true;
        };
        if !meta.file_id.is_empty() {
            task.file_id = meta.file_id;
        }
        task.next_offset = meta.next_offset;
        task.chunk_size = meta.chunk_size;
        if task.file_id.is_empty() || task.chunk_size <= 0 {
            self.last_error = Some("invalid file accept response".to_owned());
            return true;
        }

        let file_id = task.file_id.clone();
        self.upload_request_map.insert(task.request_id, file_id.clone());
        self.upload_states.insert(
            file_id.clone(),
            TransferState {
                file_id: file_id.clone(),
                file_name: task.file_name.clone(),
                total_size: task.file_size,
                transferred: task.next_offset,
                done: false,
                failed: false,
            },
        );
        self.uploads.insert(file_id.clone(), task);

        if let Err(e) = self.send_next_chunk(net, &file_id) {
            self.last_error = Some(e.to_string());
        }
        true
    }

    fn handle_upload_ack<T: Transport>(&mut self, net: &T, packet: &Packet) -> bool {
        let meta: UploadAckMeta = serde_json::from_str(&packet.meta_json).unwrap_or_default();
        let Some(file_id) = self.upload_request_map.get(&packet.request_id).cloned() else {
            return true;
        };
        let Some(task) = self.uploads.get_mut(&file_id) else {
            return true;
        };

        if !meta.status.is_empty() && meta.status != "ok" {
            task.failed = true;
            // On offset mismatch the server tells us where it actually is;
            // adopt it so a retry picks up from there.
            task.next_offset = meta.expected_offset.unwrap_or(task.next_offset);
            task.stream = None;
            if let Some(state) = self.upload_states.get_mut(&file_id) {
                state.failed = true;
            }
            self.last_error = Some(meta.message.unwrap_or_else(|| "upload failed".to_owned()));
            self.upload_request_map.remove(&packet.request_id);
            return true;
        }

        task.next_offset = meta.next_offset.unwrap_or(task.next_offset);
        let next_offset = task.next_offset;
        let file_size = task.file_size;
        if let Some(state) = self.upload_states.get_mut(&file_id) {
            state.transferred = next_offset;
        }

        let result = if next_offset >= file_size {
            self.send_upload_done(net, &file_id)
        } else {
            self.send_next_chunk(net, &file_id)
        };
        if let Err(e) = result {
            self.last_error = Some(e.to_string());
        }
        true
    }

    fn handle_download_chunk<T: Transport>(&mut self, net: &T, packet: &Packet) -> bool {
        self.download_request_map.remove(&packet.request_id);
        let meta: DownloadChunkMeta = serde_json::from_str(&packet.meta_json).unwrap_or_default();
        let (expected_offset, temp_path, file_size) = match self.downloads.get(&meta.file_id) {
            Some(task) => (task.next_offset, task.temp_path.clone(), task.file_size),
            None => return true,
        };

        if meta.offset != expected_offset {
            self.mark_download_failed(&meta.file_id, "download offset mismatch");
            return true;
        }
        if packet.binary.is_empty() && !meta.done {
            self.mark_download_failed(&meta.file_id, "download chunk empty");
            return true;
        }

        if let Err(e) = write_download_chunk(&temp_path, meta.offset, &packet.binary) {
            self.mark_download_failed(&meta.file_id, &format!("failed to write temp file: {e}"));
            return true;
        }
        let next_offset = meta.offset + packet.binary.len() as i64;
        if let Some(task) = self.downloads.get_mut(&meta.file_id) {
            task.next_offset = next_offset;
        }
        if let Some(state) = self.download_states.get_mut(&meta.file_id) {
            state.transferred = next_offset;
        }

        if meta.done || next_offset >= file_size {
            self.finish_download(&meta.file_id);
            return true;
        }

        let Some(task) = self.downloads.get(&meta.file_id).cloned() else {
            return true;
        };
        let request_id = net.next_request_id();
        if let Err(e) = self.send_download_request(net, &task, request_id) {
            self.last_error = Some(e.to_string());
        }
        true
    }

    /// Verify the assembled temp file and atomically move it into place.
    /// A hash mismatch fails the task but keeps the temp file.
    fn finish_download(&mut self, file_id: &str) {
        let (temp_path, final_path, sha256, file_size) = match self.downloads.get(file_id) {
            Some(task) => (
                task.temp_path.clone(),
                task.final_path.clone(),
                task.sha256.clone(),
                task.file_size,
            ),
            None => return,
        };

        let computed = match sha256_hex_file(&temp_path) {
            Ok(computed) => computed,
            Err(e) => {
                let message = format!("failed to hash download: {e}");
                self.mark_download_failed(file_id, &message);
                return;
            }
        };
        if computed != sha256 {
            self.mark_download_failed(file_id, "sha256 mismatch");
            return;
        }
        if std::fs::rename(&temp_path, &final_path).is_err() {
            self.mark_download_failed(file_id, "failed to move download");
            return;
        }

        if let Some(task) = self.downloads.get_mut(file_id) {
            task.done = true;
        }
        if let Some(state) = self.download_states.get_mut(file_id) {
            state.done = true;
            state.transferred = file_size;
        }
    }

    /// Read the next window of the source file and send it; called only
    /// when the previous chunk has been acked.
    fn send_next_chunk<T: Transport>(&mut self, net: &T, file_id: &str) -> Result<(), ClientError> {
        let Some(task) = self.uploads.get_mut(file_id) else {
            return Ok(());
        };
        if task.chunk_size <= 0 {
            return Err(ClientError::InvalidChunkSize);
        }
        if task.next_offset >= task.file_size {
            return self.send_upload_done(net, file_id);
        }

        let to_read = (task.file_size - task.next_offset).min(task.chunk_size) as usize;
        if task.stream.is_none() {
            task.stream = Some(File::open(&task.file_path)?);
        }
        let stream = task.stream.as_mut().expect("opened above");
        stream.seek(SeekFrom::Start(task.next_offset as u64))?;
        let mut data = vec![0u8; to_read];
        let read = stream.read(&mut data)?;
        if read == 0 {
            return Err(ClientError::UploadReadFailed);
        }
        data.truncate(read);

        let meta = FileChunkMeta {
            file_id: task.file_id.clone(),
            offset: task.next_offset,
        };
        net.send_json(
            PacketType::FileUploadChunk,
            task.request_id,
            &meta,
            Some(&data),
        )
    }

    fn send_upload_done<T: Transport>(&self, net: &T, file_id: &str) -> Result<(), ClientError> {
        let Some(task) = self.uploads.get(file_id) else {
            return Ok(());
        };
        let meta = FileIdMeta {
            file_id: task.file_id.clone(),
        };
        net.send_json(PacketType::FileUploadDone, task.request_id, &meta, None)
    }

    fn send_download_request<T: Transport>(
        &mut self,
        net: &T,
        task: &DownloadTask,
        request_id: u64,
    ) -> Result<(), ClientError> {
        let meta = DownloadRequestMeta {
            file_id: task.file_id.clone(),
            offset: task.next_offset,
        };
        net.send_json(PacketType::FileDownloadRequest, request_id, &meta, None)?;
        self.download_request_map.insert(request_id, task.file_id.clone());
        Ok(())
    }

    fn mark_upload_failed(&mut self, file_id: &str, message: &str) {
        self.last_error = Some(message.to_owned());
        if let Some(task) = self.uploads.get_mut(file_id) {
            task.failed = true;
            task.stream = None;
        }
        if let Some(state) = self.upload_states.get_mut(file_id) {
            state.failed = true;
        }
    }

    fn mark_download_failed(&mut self, file_id: &str, message: &str) {
        self.last_error = Some(message.to_owned());
        if let Some(task) = self.downloads.get_mut(file_id) {
            task.failed = true;
        }
        if let Some(state) = self.download_states.get_mut(file_id) {
            state.failed = true;
        }
    }

    fn erase_upload_mapping(&mut self, file_id: &str) {
        self.upload_request_map.retain(|_, mapped| mapped != file_id);
    }

    fn download_dir(&self, conversation_type: &str, conversation_id: &str) -> PathBuf {
        let mut dir = self.data_dir.join("downloads");
        if !conversation_type.is_empty() {
            dir.push(conversation_type);
        }
        if !conversation_id.is_empty() {
            dir.push(conversation_id);
        }
        dir
    }
}

#[allow(clippy::too_many_arguments)]
fn send_file_offer<T: Transport>(
    net: &T,
    conversation_type: &str,
    conversation_id: &str,
    file_name: &str,
    file_size: i64,
    sha256: &str,
    file_id: &str,
    request_id: u64,
) -> Result<(), ClientError> {
    let meta = FileOfferMeta {
        conversation_type: conversation_type.to_owned(),
        conversation_id: conversation_id.to_owned(),
        file_name: file_name.to_owned(),
        file_size,
        sha256: sha256.to_owned(),
        file_id: if file_id.is_empty() {
            None
        } else {
            Some(file_id.to_owned())
        },
    };
    net.send_json(PacketType::FileOffer, request_id, &meta, None)
}

fn write_download_chunk(temp_path: &Path, offset: i64, data: &[u8]) -> std::io::Result<()> {
    let mut file = if offset == 0 {
        File::create(temp_path)?
    } else {
        OpenOptions::new().read(true).write(true).open(temp_path)?
    };
    file.seek(SeekFrom::Start(offset as u64))?;
    if !data.is_empty() {
        file.write_all(data)?;
    }
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::testing::MockTransport;
    use parlor_shared::hash::sha256_hex;
    use serde_json::json;

    struct Fixture {
        net: MockTransport,
        transfers: FileTransferManager,
        dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let transfers = FileTransferManager::new(dir.path().join("client-data"));
        Fixture {
            net: MockTransport::new(),
            transfers,
            dir,
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn source_file(fixture: &Fixture, name: &str, data: &[u8]) -> PathBuf {
        let path = fixture.dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn accept_packet(request_id: u64, file_id: &str, next_offset: i64) -> Packet {
        Packet::new(
            PacketType::FileAccept,
            request_id,
            json!({
                "status": "ok", "file_id": file_id,
                "next_offset": next_offset, "chunk_size": 65536,
            })
            .to_string(),
        )
    }

    fn ack_packet(request_id: u64, next_offset: i64) -> Packet {
        Packet::new(
            PacketType::FileUploadChunk,
            request_id,
            json!({ "status": "ok", "next_offset": next_offset }).to_string(),
        )
    }

    fn chunk_packet(
        request_id: u64,
        file_id: &str,
        offset: i64,
        file_size: i64,
        sha256: &str,
        data: &[u8],
        done: bool,
    ) -> Packet {
        Packet::with_binary(
            PacketType::FileDownloadChunk,
            request_id,
            json!({
                "file_id": file_id, "offset": offset, "file_size": file_size,
                "file_name": "big.bin", "sha256": sha256, "done": done,
            })
            .to_string(),
            data.to_vec(),
        )
    }

    #[test]
    fn upload_walks_the_full_state_machine() {
        let mut fx = fixture();
        let data = payload(200_000);
        let path = source_file(&fx, "big.bin", &data);

        let offer_req = fx
            .transfers
            .begin_upload(
                &fx.net,
                &UploadRequest {
                    conversation_type: "private".into(),
                    conversation_id: "bob".into(),
                    file_path: path,
                    file_id: String::new(),
                },
            )
            .unwrap();

        let sent = fx.net.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet_type, PacketType::FileOffer);
        assert_eq!(sent[0].meta["file_size"], json!(200_000));
        assert_eq!(sent[0].meta["sha256"], json!(sha256_hex(&data)));
        assert!(sent[0].meta.get("file_id").is_none());

        // Accept promotes the offer and kicks off the chunking loop.
        fx.transfers
            .handle_packet(&fx.net, &accept_packet(offer_req, "f1", 0));
        let sent = fx.net.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet_type, PacketType::FileUploadChunk);
        assert_eq!(sent[0].request_id, offer_req);
        assert_eq!(sent[0].meta["offset"], json!(0));
        assert_eq!(sent[0].binary, data[..65536].to_vec());

        // Each ack releases exactly one more chunk.
        fx.transfers
            .handle_packet(&fx.net, &ack_packet(offer_req, 65536));
        let sent = fx.net.take_sent();
        assert_eq!(sent[0].meta["offset"], json!(65536));
        assert_eq!(sent[0].binary, data[65536..131072].to_vec());

        fx.transfers
            .handle_packet(&fx.net, &ack_packet(offer_req, 131_072));
        fx.net.take_sent();
        fx.transfers
            .handle_packet(&fx.net, &ack_packet(offer_req, 196_608));
        let sent = fx.net.take_sent();
        // Final partial chunk: exactly the remaining bytes.
        assert_eq!(sent[0].binary.len(), 3392);

        // The last ack triggers FileUploadDone instead of another chunk.
        fx.transfers
            .handle_packet(&fx.net, &ack_packet(offer_req, 200_000));
        let sent = fx.net.take_sent();
        assert_eq!(sent[0].packet_type, PacketType::FileUploadDone);
        assert_eq!(sent[0].meta["file_id"], json!("f1"));

        // FileDone completes the task.
        fx.transfers.handle_packet(
            &fx.net,
            &Packet::new(
                PacketType::FileDone,
                offer_req,
                json!({ "status": "ok", "file_id": "f1" }).to_string(),
            ),
        );
        let state = &fx.transfers.upload_states()["f1"];
        assert!(state.done);
        assert!(!state.failed);
        assert_eq!(state.progress(), 1.0);
    }

    #[test]
    fn upload_ack_error_adopts_expected_offset() {
        let mut fx = fixture();
        let data = payload(100_000);
        let path = source_file(&fx, "big.bin", &data);

        let offer_req = fx
            .transfers
            .begin_upload(
                &fx.net,
                &UploadRequest {
                    conversation_type: "private".into(),
                    conversation_id: "bob".into(),
                    file_path: path,
                    file_id: String::new(),
                },
            )
            .unwrap();
        fx.transfers
            .handle_packet(&fx.net, &accept_packet(offer_req, "f1", 0));
        fx.net.take_sent();

        fx.transfers.handle_packet(
            &fx.net,
            &Packet::new(
                PacketType::FileUploadChunk,
                offer_req,
                json!({
                    "status": "error", "code": "UPLOAD_FAILED",
                    "message": "offset mismatch", "expected_offset": 65536,
                })
                .to_string(),
            ),
        );

        assert!(fx.transfers.upload_states()["f1"].failed);
        assert_eq!(fx.transfers.last_error(), Some("offset mismatch"));
        // No further chunk goes out after a failure.
        assert!(fx.net.take_sent().is_empty());
        assert_eq!(fx.transfers.uploads["f1"].next_offset, 65536);
    }

    #[test]
    fn resume_reoffers_active_upload_with_its_file_id() {
        let mut fx = fixture();
        let data = payload(200_000);
        let path = source_file(&fx, "big.bin", &data);

        let offer_req = fx
            .transfers
            .begin_upload(
                &fx.net,
                &UploadRequest {
                    conversation_type: "private".into(),
                    conversation_id: "bob".into(),
                    file_path: path,
                    file_id: String::new(),
                },
            )
            .unwrap();
        fx.transfers
            .handle_packet(&fx.net, &accept_packet(offer_req, "f1", 0));
        fx.net.take_sent();

        // Reconnect: the upload is re-offered, carrying the assigned id.
        fx.transfers.resume_transfers(&fx.net).unwrap();
        let sent = fx.net.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet_type, PacketType::FileOffer);
        assert_eq!(sent[0].meta["file_id"], json!("f1"));
        let new_req = sent[0].request_id;
        assert_ne!(new_req, offer_req);

        // The server replies with its authoritative offset; chunking
        // continues from there.
        fx.transfers
            .handle_packet(&fx.net, &accept_packet(new_req, "f1", 131_072));
        let sent = fx.net.take_sent();
        assert_eq!(sent[0].packet_type, PacketType::FileUploadChunk);
        assert_eq!(sent[0].meta["offset"], json!(131_072));
        assert_eq!(sent[0].binary, data[131_072..196_608].to_vec());
    }

    #[test]
    fn download_assembles_verifies_and_renames() {
        let mut fx = fixture();
        let data = payload(150_000);
        let sha256 = sha256_hex(&data);

        let req = fx
            .transfers
            .begin_download(
                &fx.net,
                &DownloadRequest {
                    file_id: "f1".into(),
                    conversation_type: "private".into(),
                    conversation_id: "alice".into(),
                    file_name: "big.bin".into(),
                    sha256: sha256.clone(),
                    file_size: data.len() as i64,
                },
            )
            .unwrap();

        let sent = fx.net.take_sent();
        assert_eq!(sent[0].packet_type, PacketType::FileDownloadRequest);
        assert_eq!(sent[0].meta["offset"], json!(0));

        // Serve the file in three chunks, third one short and final.
        let mut request_id = req;
        for (offset, end) in [(0usize, 65536usize), (65536, 131_072)] {
            fx.transfers.handle_packet(
                &fx.net,
                &chunk_packet(
                    request_id,
                    "f1",
                    offset as i64,
                    data.len() as i64,
                    &sha256,
                    &data[offset..end],
                    false,
                ),
            );
            let sent = fx.net.take_sent();
            assert_eq!(sent[0].packet_type, PacketType::FileDownloadRequest);
            assert_eq!(sent[0].meta["offset"], json!(end));
            request_id = sent[0].request_id;
        }
        fx.transfers.handle_packet(
            &fx.net,
            &chunk_packet(
                request_id,
                "f1",
                131_072,
                data.len() as i64,
                &sha256,
                &data[131_072..],
                true,
            ),
        );

        let state = &fx.transfers.download_states()["f1"];
        assert!(state.done);
        assert_eq!(state.transferred, data.len() as i64);

        let final_path = fx
            .dir
            .path()
            .join("client-data/downloads/private/alice/f1_big.bin");
        assert_eq!(std::fs::read(&final_path).unwrap(), data);
        assert!(!final_path.with_extension("bin.part").exists());
    }

    #[test]
    fn download_adopts_partial_temp_file() {
        let mut fx = fixture();
        let data = payload(100_000);
        let sha256 = sha256_hex(&data);

        let temp_dir = fx
            .dir
            .path()
            .join("client-data/downloads/private/alice");
        std::fs::create_dir_all(&temp_dir).unwrap();
        std::fs::write(temp_dir.join("f1_big.bin.part"), &data[..40_000]).unwrap();

        fx.transfers
            .begin_download(
                &fx.net,
                &DownloadRequest {
                    file_id: "f1".into(),
                    conversation_type: "private".into(),
                    conversation_id: "alice".into(),
                    file_name: "big.bin".into(),
                    sha256: sha256.clone(),
                    file_size: data.len() as i64,
                },
            )
            .unwrap();

        let sent = fx.net.take_sent();
        assert_eq!(sent[0].meta["offset"], json!(40_000));

        // Completing from the adopted offset still verifies the full file.
        fx.transfers.handle_packet(
            &fx.net,
            &chunk_packet(
                sent[0].request_id,
                "f1",
                40_000,
                data.len() as i64,
                &sha256,
                &data[40_000..],
                true,
            ),
        );
        assert!(fx.transfers.download_states()["f1"].done);
    }

    #[test]
    fn download_offset_mismatch_fails_the_task() {
        let mut fx = fixture();
        let data = payload(10_000);
        let sha256 = sha256_hex(&data);

        let req = fx
            .transfers
            .begin_download(
                &fx.net,
                &DownloadRequest {
                    file_id: "f1".into(),
                    conversation_type: "private".into(),
                    conversation_id: "alice".into(),
                    file_name: "big.bin".into(),
                    sha256,
                    file_size: data.len() as i64,
                },
            )
            .unwrap();
        fx.net.take_sent();

        fx.transfers.handle_packet(
            &fx.net,
            &chunk_packet(req, "f1", 5000, data.len() as i64, "irrelevant", &data[..100], false),
        );
        assert!(fx.transfers.download_states()["f1"].failed);
        assert_eq!(fx.transfers.last_error(), Some("download offset mismatch"));
    }

    #[test]
    fn download_sha_mismatch_keeps_temp_file() {
        let mut fx = fixture();
        let data = payload(1000);

        let req = fx
            .transfers
            .begin_download(
                &fx.net,
                &DownloadRequest {
                    file_id: "f1".into(),
                    conversation_type: "private".into(),
                    conversation_id: "alice".into(),
                    file_name: "big.bin".into(),
                    sha256: "0".repeat(64),
                    file_size: data.len() as i64,
                },
            )
            .unwrap();
        fx.net.take_sent();

        fx.transfers.handle_packet(
            &fx.net,
            &chunk_packet(req, "f1", 0, data.len() as i64, "whatever", &data, true),
        );

        assert!(fx.transfers.download_states()["f1"].failed);
        assert_eq!(fx.transfers.last_error(), Some("sha256 mismatch"));
        let base = fx.dir.path().join("client-data/downloads/private/alice");
        assert!(base.join("f1_big.bin.part").exists());
        assert!(!base.join("f1_big.bin").exists());
    }

    #[test]
    fn resume_rerequests_open_downloads_and_drops_stale_correlations() {
        let mut fx = fixture();
        let data = payload(100_000);
        let sha256 = sha256_hex(&data);

        let req = fx
            .transfers
            .begin_download(
                &fx.net,
                &DownloadRequest {
                    file_id: "f1".into(),
                    conversation_type: "private".into(),
                    conversation_id: "alice".into(),
                    file_name: "big.bin".into(),
                    sha256: sha256.clone(),
                    file_size: data.len() as i64,
                },
            )
            .unwrap();
        fx.net.take_sent();
        fx.transfers.handle_packet(
            &fx.net,
            &chunk_packet(req, "f1", 0, data.len() as i64, &sha256, &data[..65536], false),
        );
        fx.net.take_sent();

        fx.transfers.resume_transfers(&fx.net).unwrap();
        let sent = fx.net.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].packet_type, PacketType::FileDownloadRequest);
        assert_eq!(sent[0].meta["offset"], json!(65536));

        // A chunk from before the reconnect no longer matches next_offset
        // and fails the task instead of corrupting the temp file.
        let stale = chunk_packet(req, "f1", 0, data.len() as i64, &sha256, &data[..65536], false);
        fx.transfers.handle_packet(&fx.net, &stale);
        assert!(fx.transfers.download_states()["f1"].failed);
    }

    #[test]
    fn empty_file_is_rejected() {
        let mut fx = fixture();
        let path = source_file(&fx, "empty.bin", b"");
        let err = fx
            .transfers
            .begin_upload(
                &fx.net,
                &UploadRequest {
                    conversation_type: "private".into(),
                    conversation_id: "bob".into(),
                    file_path: path,
                    file_id: String::new(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ClientError::EmptyFile));
    }
}
