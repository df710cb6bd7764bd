//! Content-addressed asset downloads
//!
//! Clients ask for an asset by the hex SHA-256 of its bytes. The file is
//! read on the blocking thread pool and streamed as [`AssetChunkCommand`]s
//! straight into the session's outbound queue, so a large download never
//! stalls the tick loop. Every transfer has a `u32` handle the client can
//! cancel it by.

use crate::client_manager::{Outbox, Outgoing};
use crate::utils::to_hex;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use shared::packets::AssetChunkCommand;
use shared::{Blob, SessionId};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Payload bytes per chunk command
pub const ASSET_CHUNK_SIZE: usize = 8 * 1024;

pub trait AssetHandle: Send {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>>;
}

pub trait AssetStore: Send + Sync {
    fn get(&self, hash: &str) -> Option<Box<dyn AssetHandle>>;
}

pub fn content_hash(bytes: &[u8]) -> String {
    to_hex(&Sha256::digest(bytes))
}

struct FileAsset {
    path: PathBuf,
    len: u64,
}

impl AssetHandle for FileAsset {
    fn len(&self) -> u64 {
        self.len
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(&self.path)?))
    }
}

/// Every file below a directory, indexed by content hash at startup
pub struct DirectoryAssetStore {
    index: HashMap<String, (PathBuf, u64)>,
}

impl DirectoryAssetStore {
    pub fn open(root: &Path) -> io::Result<Self> {
        let mut index = HashMap::new();
        let mut pending = vec![root.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let bytes = fs::read(&path)?;
                index.insert(content_hash(&bytes), (path, bytes.len() as u64));
            }
        }
        info!("Indexed {} assets under {}", index.len(), root.display());
        Ok(Self { index })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl AssetStore for DirectoryAssetStore {
    fn get(&self, hash: &str) -> Option<Box<dyn AssetHandle>> {
        let (path, len) = self.index.get(&hash.to_ascii_lowercase())?;
        Some(Box::new(FileAsset {
            path: path.clone(),
            len: *len,
        }))
    }
}

struct MemoryAsset(Arc<[u8]>);

impl AssetHandle for MemoryAsset {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.0.clone())))
    }
}

#[derive(Default)]
pub struct MemoryAssetStore {
    assets: HashMap<String, Arc<[u8]>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` and returns their hash
    pub fn insert(&mut self, bytes: impl Into<Arc<[u8]>>) -> String {
        let bytes = bytes.into();
        let hash = content_hash(&bytes);
        self.assets.insert(hash.clone(), bytes);
        hash
    }
}

impl AssetStore for MemoryAssetStore {
    fn get(&self, hash: &str) -> Option<Box<dyn AssetHandle>> {
        let bytes = self.assets.get(&hash.to_ascii_lowercase())?;
        Some(Box::new(MemoryAsset(bytes.clone())))
    }
}

struct Transfer {
    session: SessionId,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Downloads in flight, keyed by handle
#[derive(Default)]
pub struct AssetTransfers {
    next_handle: u32,
    active: HashMap<u32, Transfer>,
}

impl AssetTransfers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts streaming `asset` to a session and returns the transfer handle
    ///
    /// Must be called from within the tokio runtime.
    pub fn start(&mut self, session: SessionId, asset: Box<dyn AssetHandle>, outbox: Outbox) -> u32 {
        self.active.retain(|_, transfer| !transfer.task.is_finished());

        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        let handle = self.next_handle;
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let task = tokio::task::spawn_blocking(move || {
            if let Err(e) = stream_asset(handle, asset.as_ref(), &outbox, &flag) {
                warn!("Asset transfer {} for session {} failed: {}", handle, session, e);
            }
        });
        debug!("Session {} started asset transfer {}", session, handle);
        self.active.insert(
            handle,
            Transfer {
                session,
                cancelled,
                task,
            },
        );
        handle
    }

    /// Cancels a transfer owned by `session`
    pub fn cancel(&mut self, session: SessionId, handle: u32) -> bool {
        match self.active.get(&handle) {
            Some(transfer) if transfer.session == session => {
                transfer.cancelled.store(true, Ordering::Relaxed);
                self.active.remove(&handle);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_session(&mut self, session: SessionId) {
        self.active.retain(|_, transfer| {
            if transfer.session == session {
                transfer.cancelled.store(true, Ordering::Relaxed);
                false
            } else {
                true
            }
        });
    }

    /// Transfers not yet finished
    pub fn len(&self) -> usize {
        self.active
            .values()
            .filter(|transfer| !transfer.task.is_finished())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels everything and waits for the readers to stop
    pub async fn shutdown(&mut self) {
        for transfer in self.active.values() {
            transfer.cancelled.store(true, Ordering::Relaxed);
        }
        for (handle, transfer) in self.active.drain() {
            if let Err(e) = transfer.task.await {
                warn!("Asset transfer {} ended abnormally: {}", handle, e);
            }
        }
    }
}

fn read_chunk<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(ASSET_CHUNK_SIZE);
    reader
        .by_ref()
        .take(ASSET_CHUNK_SIZE as u64)
        .read_to_end(&mut chunk)?;
    Ok(chunk)
}

fn stream_asset(
    handle: u32,
    asset: &dyn AssetHandle,
    outbox: &Outbox,
    cancelled: &AtomicBool,
) -> io::Result<()> {
    let mut reader = asset.open_read()?;
    let mut offset = 0u64;
    let mut current = read_chunk(&mut reader)?;
    loop {
        if cancelled.load(Ordering::Relaxed) {
            debug!("Asset transfer {} cancelled at {}", handle, offset);
            return Ok(());
        }
        // Read ahead so the final chunk can be flagged
        let next = if current.is_empty() {
            Vec::new()
        } else {
            read_chunk(&mut reader)?
        };
        let last = next.is_empty();
        let len = current.len() as u64;
        let chunk = AssetChunkCommand {
            handle,
            offset,
            data: Blob(current),
            last,
        };
        if outbox.send(Outgoing::packet(&chunk)).is_err() || last {
            return Ok(());
        }
        offset += len;
        current = next;
    }
}
