//! The node's periodic tasks.

use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

use super::PeriodicTask;
use crate::meshtastic::{NodeInfo, Transport, BROADCAST_ADDR};
use crate::storage::{PeerPersistence, PeerStore};

/// Broadcasts this node's NodeInfo.
#[derive(Clone)]
pub struct AnnounceTask {
    identity: Arc<NodeInfo>,
    transport: Arc<dyn Transport>,
    every: u64,
}

impl AnnounceTask {
    pub fn new(identity: Arc<NodeInfo>, transport: Arc<dyn Transport>, every: u64) -> Self {
        Self {
            identity,
            transport,
            every,
        }
    }
}

impl PeriodicTask for AnnounceTask {
    fn name(&self) -> &'static str {
        "announce"
    }

    fn every(&self) -> u64 {
        self.every
    }

    fn run(&mut self, tick: u64) {
        match self
            .transport
            .send_node_info(&self.identity, BROADCAST_ADDR, false)
        {
            Ok(()) => info!(
                "Announced {} '{}' (tick {})",
                self.identity.user_id(),
                self.identity.long_name,
                tick
            ),
            Err(e) => warn!("Announcement failed: {}", e),
        }
    }
}

/// Writes the peer store out whenever it is dirty.
///
/// Inside a tokio runtime the write runs on the blocking pool so a slow disk never
/// stalls the control loop or the dispatcher; ticks that land while a write is still in
/// flight are skipped. Outside a runtime the write happens inline.
#[derive(Clone)]
pub struct PersistTask {
    peers: Arc<PeerStore>,
    backend: Arc<dyn PeerPersistence>,
    failures: Arc<AtomicU32>,
    in_flight: Arc<AtomicBool>,
}

impl PersistTask {
    pub fn new(peers: Arc<PeerStore>, backend: Arc<dyn PeerPersistence>) -> Self {
        Self {
            peers,
            backend,
            failures: Arc::new(AtomicU32::new(0)),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Persist if dirty on the calling thread. Returns whether the backend was called.
    pub fn persist_if_dirty(&self) -> bool {
        let written = self
            .peers
            .save_with(|snapshot| self.backend.persist(snapshot));
        match written {
            Ok(false) => false,
            Ok(true) => {
                let failed = self.failures.swap(0, Ordering::AcqRel);
                if failed > 0 {
                    info!("Peer store persisted after {} failed attempts", failed);
                }
                true
            }
            Err(e) => {
                // The store stays dirty; retried next tick.
                let failed = self.failures.fetch_add(1, Ordering::AcqRel);
                if failed == 0 {
                    warn!("Failed to persist peer store: {}", e);
                } else {
                    debug!("Peer store persist retry {} failed: {}", failed, e);
                }
                true
            }
        }
    }
}

impl PeriodicTask for PersistTask {
    fn name(&self) -> &'static str {
        "persist"
    }

    fn every(&self) -> u64 {
        1
    }

    fn run(&mut self, _tick: u64) {
        if !self.peers.needs_save() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            self.persist_if_dirty();
            return;
        };
        if self.in_flight.swap(true, Ordering::AcqRel) {
            trace!("Peer store write still in flight, skipping tick");
            return;
        }
        let task = self.clone();
        runtime.spawn_blocking(move || {
            task.persist_if_dirty();
            task.in_flight.store(false, Ordering::Release);
        });
    }
}

/// Forgets peers that have been silent for too long.
pub struct PruneTask {
    peers: Arc<PeerStore>,
    max_age: chrono::Duration,
    every: u64,
}

impl PruneTask {
    pub fn new(peers: Arc<PeerStore>, max_age: chrono::Duration, every: u64) -> Self {
        Self {
            peers,
            max_age,
            every,
        }
    }
}

impl PeriodicTask for PruneTask {
    fn name(&self) -> &'static str {
        "prune"
    }

    fn every(&self) -> u64 {
        self.every
    }

    fn run(&mut self, _tick: u64) {
        let removed = self.peers.prune_stale(self.max_age);
        if removed > 0 {
            info!(
                "Pruned {} peers not heard for {} days",
                removed,
                self.max_age.num_days()
            );
        }
    }
}
