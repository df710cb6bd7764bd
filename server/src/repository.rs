//! Storage for accounts, characters and bans
//!
//! Records are keyed by a normalized name. [`MemoryRepository`] keeps them in
//! a map for tests and throwaway servers; [`FileRepository`] writes one
//! bincode file per record below a data directory.

use crate::utils::to_hex;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("record {path} could not be encoded: {source}")]
    Encoding {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// Keyed record storage
pub trait Repository<T>: Send {
    fn get(&self, id: &str) -> Result<Option<T>>;

    fn get_all(&self) -> Result<Vec<T>>;

    /// Inserts or replaces
    fn save(&mut self, id: &str, value: &T) -> Result<()>;

    /// Inserts only if `id` is free; returns whether it was
    fn create(&mut self, id: &str, value: &T) -> Result<bool> {
        if self.get(id)?.is_some() {
            return Ok(false);
        }
        self.save(id, value)?;
        Ok(true)
    }

    fn delete(&mut self, id: &str) -> Result<()>;
}

#[derive(Debug)]
pub struct MemoryRepository<T> {
    records: HashMap<String, T>,
}

impl<T> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
        }
    }
}

impl<T> MemoryRepository<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Clone + Send> Repository<T> for MemoryRepository<T> {
    fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.records.get(id).cloned())
    }

    fn get_all(&self) -> Result<Vec<T>> {
        Ok(self.records.values().cloned().collect())
    }

    fn save(&mut self, id: &str, value: &T) -> Result<()> {
        self.records.insert(id.to_string(), value.clone());
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        self.records.remove(id);
        Ok(())
    }
}

/// One bincode file per record
///
/// File names are the hex-encoded key so any name maps to a safe path.
#[derive(Debug, Clone)]
pub struct FileRepository {
    root: PathBuf,
}

impl FileRepository {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| RepositoryError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.bin", to_hex(id.as_bytes())))
    }

    fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RepositoryError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|source| RepositoryError::Encoding {
                path: path.to_path_buf(),
                source,
            })
    }
}

impl<T> Repository<T> for FileRepository
where
    T: Serialize + DeserializeOwned,
{
    fn get(&self, id: &str) -> Result<Option<T>> {
        Self::read(&self.path_for(id))
    }

    fn get_all(&self) -> Result<Vec<T>> {
        let entries = fs::read_dir(&self.root).map_err(|source| RepositoryError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut records = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                continue;
            }
            match Self::read(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record: {}", e),
            }
        }
        Ok(records)
    }

    fn save(&mut self, id: &str, value: &T) -> Result<()> {
        let path = self.path_for(id);
        let bytes = bincode::serialize(value).map_err(|source| RepositoryError::Encoding {
            path: path.clone(),
            source,
        })?;
        // Write beside the record and swap it in, so a crash never leaves half a file
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes)
            .and_then(|()| fs::rename(&staging, &path))
            .map_err(|source| RepositoryError::Io { path, source })
    }

    fn delete(&mut self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(RepositoryError::Io { path, source }),
        }
    }
}

/// A banned address and who banned it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ban {
    pub addr: IpAddr,
    pub by: String,
    /// Unix time in milliseconds
    pub at: u64,
}

pub trait BanList: Send {
    fn is_banned(&self, addr: IpAddr) -> bool;

    fn add_ban(&mut self, addr: IpAddr, by: &str) -> Result<()>;

    fn get_all(&self) -> Vec<Ban>;
}

/// Ban list over any [`Repository`], cached in memory for connect-time checks
pub struct StoredBanList<R> {
    bans: Vec<Ban>,
    store: R,
}

pub type MemoryBanList = StoredBanList<MemoryRepository<Ban>>;
pub type FileBanList = StoredBanList<FileRepository>;

impl<R: Repository<Ban>> StoredBanList<R> {
    pub fn load(store: R) -> Result<Self> {
        let bans = store.get_all()?;
        Ok(Self { bans, store })
    }
}

impl MemoryBanList {
    pub fn new() -> Self {
        Self {
            bans: Vec::new(),
            store: MemoryRepository::new(),
        }
    }
}

impl Default for MemoryBanList {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Repository<Ban>> BanList for StoredBanList<R> {
    fn is_banned(&self, addr: IpAddr) -> bool {
        self.bans.iter().any(|ban| ban.addr == addr)
    }

    fn add_ban(&mut self, addr: IpAddr, by: &str) -> Result<()> {
        if self.is_banned(addr) {
            return Ok(());
        }
        let ban = Ban {
            addr,
            by: by.to_string(),
            at: crate::utils::get_timestamp(),
        };
        self.store.save(&addr.to_string(), &ban)?;
        self.bans.push(ban);
        Ok(())
    }

    fn get_all(&self) -> Vec<Ban> {
        self.bans.clone()
    }
}
