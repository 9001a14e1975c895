mod common;

use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use common::{test_config, MemoryPersistence, RecordingTransport};
use meshbaba::meshtastic::{NodeInfo, BROADCAST_ADDR};
use meshbaba::scheduler::{Lifecycle, PeriodicTask, PersistTask};
use meshbaba::storage::{PeerPersistence, PeerSnapshot, PeerStore, PersistError};

/// Backend that notes which thread performed each write and takes its time doing it.
#[derive(Default)]
struct SlowDisk {
    writers: Mutex<Vec<ThreadId>>,
}

impl PeerPersistence for SlowDisk {
    fn load(&self) -> Result<PeerSnapshot, PersistError> {
        Ok(PeerSnapshot::default())
    }

    fn persist(&self, _snapshot: &PeerSnapshot) -> Result<(), PersistError> {
        thread::sleep(Duration::from_millis(50));
        self.writers.lock().unwrap().push(thread::current().id());
        Ok(())
    }
}

fn identity() -> Arc<NodeInfo> {
    Arc::new(NodeInfo::new(0xABBA_BABA, "Info", "Info node", 1))
}

#[test]
fn persist_is_a_no_op_when_clean() {
    let peers = Arc::new(PeerStore::new());
    let backend = Arc::new(MemoryPersistence::default());
    let mut task = PersistTask::new(peers, backend.clone());
    for tick in 1..=5 {
        task.run(tick);
    }
    assert_eq!(backend.calls(), 0);
}

#[test]
fn dirty_store_is_cleared_by_next_tick() {
    let peers = Arc::new(PeerStore::new());
    let backend = Arc::new(MemoryPersistence::default());
    let mut task = PersistTask::new(peers.clone(), backend.clone());

    peers.upsert(NodeInfo::new(1, "A", "Alpha", 0));
    assert!(peers.needs_save());
    task.run(1);
    assert!(!peers.needs_save());
    assert_eq!(backend.calls(), 1);
    assert_eq!(backend.last_saved_len(), Some(1));

    task.run(2);
    assert_eq!(backend.calls(), 1);
}

#[test]
fn failing_backend_keeps_flag_until_success() {
    let peers = Arc::new(PeerStore::new());
    let backend = Arc::new(MemoryPersistence::default());
    let mut task = PersistTask::new(peers.clone(), backend.clone());

    backend.set_failing(true);
    peers.upsert(NodeInfo::new(1, "A", "Alpha", 0));
    for tick in 1..=4 {
        task.run(tick);
        assert!(peers.needs_save());
    }
    assert_eq!(backend.calls(), 4);

    backend.set_failing(false);
    task.run(5);
    assert!(!peers.needs_save());
    assert_eq!(backend.calls(), 5);
}

#[tokio::test]
async fn write_inside_runtime_leaves_the_async_thread() {
    let peers = Arc::new(PeerStore::new());
    let disk = Arc::new(SlowDisk::default());
    let mut task = PersistTask::new(peers.clone(), disk.clone());

    peers.upsert(NodeInfo::new(1, "A", "Alpha", 0));
    task.run(1);
    // Returns before the slow write finishes; a second tick does not start another.
    assert!(peers.needs_save());
    task.run(2);

    for _ in 0..100 {
        if !peers.needs_save() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!peers.needs_save());
    let writers = disk.writers.lock().unwrap().clone();
    assert_eq!(writers.len(), 1);
    assert_ne!(writers[0], thread::current().id());
}

#[tokio::test(start_paused = true)]
async fn lifecycle_announces_at_start_and_on_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path().to_str().unwrap());
    config.scheduler.tick_ms = 100;
    config.scheduler.announce_interval_secs = 2;

    let transport = Arc::new(RecordingTransport::default());
    let peers = Arc::new(PeerStore::new());
    let backend = Arc::new(MemoryPersistence::default());
    let lifecycle = Lifecycle::new(&config, identity(), transport.clone(), peers, backend);
    assert_eq!(lifecycle.scheduler().task_names(), vec!["announce", "persist"]);

    let handle = tokio::spawn(lifecycle.start());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.announcements(), 1);

    // Ticks 20 and 40 land at 2.0 s and 4.0 s.
    tokio::time::sleep(Duration::from_millis(4_000)).await;
    handle.abort();
    assert_eq!(transport.announcements(), 3);
    assert!(transport
        .node_infos()
        .iter()
        .all(|(id, to, want)| *id == 0xABBA_BABA && *to == BROADCAST_ADDR && !*want));
}

#[tokio::test(start_paused = true)]
async fn lifecycle_persists_mutations_made_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().to_str().unwrap());

    let transport = Arc::new(RecordingTransport::default());
    let peers = Arc::new(PeerStore::new());
    let backend = Arc::new(MemoryPersistence::default());
    let lifecycle = Lifecycle::new(
        &config,
        identity(),
        transport,
        peers.clone(),
        backend.clone(),
    );
    let handle = tokio::spawn(lifecycle.start());

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(backend.calls(), 0);

    peers.upsert(NodeInfo::new(0x99, "NINE", "Niner", 3));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!peers.needs_save());
    assert_eq!(backend.calls(), 1);

    backend.set_failing(true);
    peers.upsert(NodeInfo::new(0x98, "EIGH", "Eighter", 3));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(peers.needs_save());

    backend.set_failing(false);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!peers.needs_save());
    assert_eq!(backend.last_saved_len(), Some(2));
    handle.abort();
}

#[test]
fn prune_task_registered_only_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path().to_str().unwrap());
    let make = |config: &meshbaba::config::Config| {
        Lifecycle::new(
            config,
            identity(),
            Arc::new(RecordingTransport::default()),
            Arc::new(PeerStore::new()),
            Arc::new(MemoryPersistence::default()),
        )
    };
    assert!(!make(&config).scheduler().task_names().contains(&"prune"));
    config.storage.stale_peer_days = 14;
    assert!(make(&config).scheduler().task_names().contains(&"prune"));
}
