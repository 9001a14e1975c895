//! # Peer Store
//!
//! In-memory database of every peer this node has heard, keyed by node id, plus the
//! dirty tracking that drives persistence from the control loop.
//!
//! ## Dirty tracking
//!
//! Instead of a plain boolean the store keeps two generation counters:
//!
//! - `changes` is bumped (under the write lock) by every mutation;
//! - `saved` records the newest generation known to be on disk.
//!
//! The store is dirty while `changes > saved`. A persist takes a [`PeerSnapshot`] tagged
//! with the generation it reflects and, once the backend wrote it, calls
//! [`PeerStore::clear_dirty`] with that generation. A mutation that lands while the
//! write is in flight bumps `changes` past the snapshot, so the store stays dirty and
//! the next tick persists again. The flag is never cleared against unpersisted state.
//!
//! Re-announcements refresh `last_seen` in memory; the refresh is persisted once the
//! stored timestamp is older than [`LAST_SEEN_RESOLUTION_SECS`].
//!
//! ## Retired peers
//!
//! Pruning drops a peer's record but keeps its node id in a persisted retired set. A
//! retired peer that shows up again is restored without counting as new, so first-contact
//! behaviour never repeats for it.
//!
//! Handlers read from the store concurrently with the scheduler; the dispatcher is the
//! only writer of peer records.

pub mod peer_file;

pub use peer_file::{JsonPeerFile, PeerPersistence, PersistError};

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::meshtastic::{NodeInfo, Position};

/// How stale (seconds) a stored `last_seen` may get before a sighting is worth a write.
pub const LAST_SEEN_RESOLUTION_SECS: i64 = 3600;

/// A known peer and when we heard from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(flatten)]
    pub info: NodeInfo,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl PeerRecord {
    pub fn new(info: NodeInfo) -> Self {
        let now = Utc::now();
        Self {
            info,
            first_seen: now,
            last_seen: now,
        }
    }

    /// Refresh `last_seen`. True when the stored value had gone stale.
    fn touch(&mut self, now: DateTime<Utc>) -> bool {
        let stale = now - self.last_seen >= chrono::Duration::seconds(LAST_SEEN_RESOLUTION_SECS);
        self.last_seen = now;
        stale
    }
}

/// Outcome of [`PeerStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerUpdate {
    /// The node id has never been seen before, not even before a prune.
    pub is_new: bool,
    /// Something worth persisting changed (always true for new peers).
    pub changed: bool,
}

/// Consistent copy of the store, as persisted and as loaded back.
#[derive(Debug, Clone, Default)]
pub struct PeerSnapshot {
    /// Store generation this copy reflects (0 for loaded data).
    pub generation: u64,
    pub peers: Vec<PeerRecord>,
    /// Node ids pruned from `peers` that must not count as new again.
    pub retired: Vec<u32>,
}

#[derive(Debug, Default)]
struct Peers {
    records: HashMap<u32, PeerRecord>,
    retired: BTreeSet<u32>,
}

#[derive(Debug, Default)]
pub struct PeerStore {
    peers: RwLock<Peers>,
    changes: AtomicU64,
    saved: AtomicU64,
    /// Serializes writers so a newer snapshot never lands before an older one.
    save_lock: Mutex<()>,
}

impl PeerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clean store from previously persisted data.
    pub fn restore(snapshot: PeerSnapshot) -> Self {
        let records = snapshot
            .peers
            .into_iter()
            .map(|r| (r.info.node_id, r))
            .collect::<HashMap<_, _>>();
        let retired = snapshot
            .retired
            .into_iter()
            .filter(|id| !records.contains_key(id))
            .collect();
        Self {
            peers: RwLock::new(Peers { records, retired }),
            changes: AtomicU64::new(0),
            saved: AtomicU64::new(0),
            save_lock: Mutex::new(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Peers> {
        self.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Peers> {
        self.peers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.changes.fetch_add(1, Ordering::AcqRel);
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().records.is_empty()
    }

    pub fn contains(&self, node_id: u32) -> bool {
        self.read().records.contains_key(&node_id)
    }

    pub fn get(&self, node_id: u32) -> Option<NodeInfo> {
        self.read().records.get(&node_id).map(|r| r.info.clone())
    }

    /// Short name of a known peer, `None` when unknown or blank.
    pub fn short_name(&self, node_id: u32) -> Option<String> {
        self.read()
            .records
            .get(&node_id)
            .map(|r| r.info.short_name.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    /// Insert or refresh a peer. Marks the store dirty when the peer is new, its
    /// names/role changed, or its stored `last_seen` went stale.
    pub fn upsert(&self, mut info: NodeInfo) -> PeerUpdate {
        let now = Utc::now();
        let mut peers = self.write();
        let update = match peers.records.get_mut(&info.node_id) {
            Some(existing) => {
                let stale = existing.touch(now);
                let renamed = existing.info.short_name != info.short_name
                    || existing.info.long_name != info.long_name
                    || existing.info.role != info.role;
                if renamed {
                    // Keep a position learned from POSITION_APP packets.
                    if info.position.is_none() {
                        info.position = existing.info.position;
                    }
                    existing.info = info;
                }
                PeerUpdate {
                    is_new: false,
                    changed: renamed || stale,
                }
            }
            None => {
                let returning = peers.retired.remove(&info.node_id);
                if returning {
                    debug!("Peer 0x{:08x} is back after being pruned", info.node_id);
                }
                peers.records.insert(info.node_id, PeerRecord::new(info));
                PeerUpdate {
                    is_new: !returning,
                    changed: true,
                }
            }
        };
        if update.changed {
            self.bump();
        }
        update
    }

    /// Record a reported position for a known peer. Unknown peers are ignored.
    pub fn update_position(&self, node_id: u32, position: Position) -> bool {
        let mut peers = self.write();
        let Some(existing) = peers.records.get_mut(&node_id) else {
            return false;
        };
        let stale = existing.touch(Utc::now());
        let moved = existing.info.position != Some(position);
        existing.info.position = Some(position);
        if moved || stale {
            self.bump();
        }
        moved
    }

    /// Drop peers not heard within `max_age`. Returns how many were removed.
    pub fn prune_stale(&self, max_age: chrono::Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut peers = self.write();
        let stale: Vec<u32> = peers
            .records
            .values()
            .filter(|r| r.last_seen <= cutoff)
            .map(|r| r.info.node_id)
            .collect();
        for id in &stale {
            peers.records.remove(id);
            peers.retired.insert(*id);
        }
        if !stale.is_empty() {
            self.bump();
            debug!("Pruned {} stale peers", stale.len());
        }
        stale.len()
    }

    /// True while in-memory state is newer than what was last persisted.
    pub fn needs_save(&self) -> bool {
        self.changes.load(Ordering::Acquire) > self.saved.load(Ordering::Acquire)
    }

    /// Copy of all records tagged with the generation they reflect.
    pub fn snapshot(&self) -> PeerSnapshot {
        let peers = self.read();
        let generation = self.changes.load(Ordering::Acquire);
        let mut records: Vec<PeerRecord> = peers.records.values().cloned().collect();
        records.sort_by_key(|r| r.info.node_id);
        PeerSnapshot {
            generation,
            peers: records,
            retired: peers.retired.iter().copied().collect(),
        }
    }

    /// Mark everything up to `generation` as persisted. Later changes keep the store
    /// dirty.
    pub fn clear_dirty(&self, generation: u64) {
        self.saved.fetch_max(generation, Ordering::AcqRel);
    }

    /// If dirty, hand a fresh snapshot to `write` and clear the flag once it succeeds.
    /// Returns whether `write` was called. Concurrent callers take turns.
    pub fn save_with<E>(
        &self,
        write: impl FnOnce(&PeerSnapshot) -> Result<(), E>,
    ) -> Result<bool, E> {
        let _turn = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.needs_save() {
            return Ok(false);
        }
        let snapshot = self.snapshot();
        write(&snapshot)?;
        self.clear_dirty(snapshot.generation);
        Ok(true)
    }
}
