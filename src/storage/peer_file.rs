//! JSON persistence for the peer store.
//!
//! File layout (`<data_dir>/peers.json` by default):
//!
//! ```json
//! { "version": 1, "saved_at": "2026-01-01T00:00:00Z", "peers": [ ... ], "retired": [ ... ] }
//! ```
//!
//! `retired` lists node ids pruned from `peers`; files without it load as none.
//!
//! Writes go to a unique temp file in the same directory which is then renamed over
//! the target while an exclusive fs2 lock is held, so readers never see a torn file.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use thiserror::Error;

use super::{PeerRecord, PeerSnapshot};

pub const PEER_FILE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("peer file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("peer file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("peer file {path} has unsupported version {found} (expected {PEER_FILE_VERSION})")]
    UnsupportedVersion { path: PathBuf, found: u32 },
}

/// Storage backend behind the peer store. The scheduler only ever talks to this trait.
pub trait PeerPersistence: Send + Sync {
    /// Previously persisted peers; an absent backing file yields an empty snapshot.
    fn load(&self) -> Result<PeerSnapshot, PersistError>;

    fn persist(&self, snapshot: &PeerSnapshot) -> Result<(), PersistError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PeerFile {
    version: u32,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    peers: Vec<PeerRecord>,
    #[serde(default)]
    retired: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct JsonPeerFile {
    path: PathBuf,
}

impl JsonPeerFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_err(&self, source: std::io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn json_err(&self, source: serde_json::Error) -> PersistError {
        PersistError::Json {
            path: self.path.clone(),
            source,
        }
    }

    fn write_atomic(&self, content: &[u8]) -> Result<(), std::io::Error> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;
        lock_file.lock_exclusive()?;

        let base = self
            .path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("peers.json");
        let mut counter = 0u32;
        let tmp_path = loop {
            let candidate = dir.join(format!(".{}.tmp-{}-{}", base, std::process::id(), counter));
            match OpenOptions::new().write(true).create_new(true).open(&candidate) {
                Ok(mut tmp) => {
                    let written = tmp
                        .write_all(content)
                        .and_then(|_| tmp.flush())
                        .and_then(|_| tmp.sync_all());
                    if let Err(e) = written {
                        let _ = fs::remove_file(&candidate);
                        return Err(e);
                    }
                    break candidate;
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    counter = counter.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        };

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }
        if let Ok(dirf) = File::open(&dir) {
            let _ = dirf.sync_all();
        }
        let _ = lock_file.unlock();
        Ok(())
    }
}

impl PeerPersistence for JsonPeerFile {
    fn load(&self) -> Result<PeerSnapshot, PersistError> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No peer file at {}, starting empty", self.path.display());
                return Ok(PeerSnapshot::default());
            }
            Err(e) => return Err(self.io_err(e)),
        };
        file.lock_shared().map_err(|e| self.io_err(e))?;
        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        let _ = file.unlock();
        read.map_err(|e| self.io_err(e))?;

        if content.trim().is_empty() {
            warn!("Peer file {} is empty, starting empty", self.path.display());
            return Ok(PeerSnapshot::default());
        }
        let parsed: PeerFile = serde_json::from_str(&content).map_err(|e| self.json_err(e))?;
        if parsed.version != PEER_FILE_VERSION {
            return Err(PersistError::UnsupportedVersion {
                path: self.path.clone(),
                found: parsed.version,
            });
        }
        Ok(PeerSnapshot {
            generation: 0,
            peers: parsed.peers,
            retired: parsed.retired,
        })
    }

    fn persist(&self, snapshot: &PeerSnapshot) -> Result<(), PersistError> {
        let file = PeerFile {
            version: PEER_FILE_VERSION,
            saved_at: Utc::now(),
            peers: snapshot.peers.clone(),
            retired: snapshot.retired.clone(),
        };
        let content = serde_json::to_vec_pretty(&file).map_err(|e| self.json_err(e))?;
        self.write_atomic(&content).map_err(|e| self.io_err(e))?;
        debug!(
            "Persisted {} peers (generation {}) to {}",
            snapshot.peers.len(),
            snapshot.generation,
            self.path.display()
        );
        Ok(())
    }
}
