//! Test utilities & fixtures shared by the integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use meshbaba::config::Config;
use meshbaba::meshtastic::{
    NodeInfo, OutgoingText, PacketHeader, Transport, TransportError, BROADCAST_ADDR,
};
use meshbaba::storage::{PeerPersistence, PeerSnapshot, PersistError};

/// Transport that remembers every request.
#[derive(Default)]
pub struct RecordingTransport {
    pub texts: Mutex<Vec<OutgoingText>>,
    pub node_infos: Mutex<Vec<(u32, u32, bool)>>,
    pub fail: AtomicBool,
}

impl RecordingTransport {
    pub fn texts(&self) -> Vec<OutgoingText> {
        self.texts.lock().unwrap().clone()
    }

    /// `(announced node id, destination, want_response)` per NodeInfo send.
    pub fn node_infos(&self) -> Vec<(u32, u32, bool)> {
        self.node_infos.lock().unwrap().clone()
    }

    pub fn announcements(&self) -> usize {
        self.node_infos()
            .iter()
            .filter(|(_, to, _)| *to == BROADCAST_ADDR)
            .count()
    }
}

impl Transport for RecordingTransport {
    fn send_text(&self, msg: OutgoingText) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.texts.lock().unwrap().push(msg);
        Ok(())
    }

    fn send_node_info(
        &self,
        info: &NodeInfo,
        to: u32,
        want_response: bool,
    ) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.node_infos
            .lock()
            .unwrap()
            .push((info.node_id, to, want_response));
        Ok(())
    }
}

/// In-memory persistence backend that can be switched into a failing state.
#[derive(Default)]
pub struct MemoryPersistence {
    pub saved: Mutex<Vec<PeerSnapshot>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub initial: PeerSnapshot,
}

impl MemoryPersistence {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn last_saved_len(&self) -> Option<usize> {
        self.saved.lock().unwrap().last().map(|s| s.peers.len())
    }

    pub fn last_saved(&self) -> Option<PeerSnapshot> {
        self.saved.lock().unwrap().last().cloned()
    }
}

impl PeerPersistence for MemoryPersistence {
    fn load(&self) -> Result<PeerSnapshot, PersistError> {
        Ok(self.initial.clone())
    }

    fn persist(&self, snapshot: &PeerSnapshot) -> Result<(), PersistError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistError::Io {
                path: "memory".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.saved.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

pub fn header(from: u32, to: u32, channel: u8, hop_start: u8, hop_limit: u8) -> PacketHeader {
    PacketHeader {
        from,
        to,
        channel,
        id: 0x0102_0304,
        hop_start,
        hop_limit,
        rssi: -42.3,
        snr: 7.1,
    }
}

/// Default config writing into `data_dir` and logging nowhere.
pub fn test_config(data_dir: &str) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = data_dir.to_string();
    config.logging.file = None;
    config
}
