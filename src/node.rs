//! The node context.
//!
//! [`MeshNode`] owns everything that lives as long as the process: configuration, this
//! node's identity, the peer store and its persistence backend. Running the node hands a
//! transport to the responder, dispatcher and control loop and drives the latter two
//! concurrently until Ctrl-C.

use anyhow::{bail, Result};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::identity::build_identity;
use crate::meshtastic::{Dispatcher, Inbound, LogTransport, NodeInfo, Transport};
use crate::responder::Responder;
use crate::scheduler::{Lifecycle, PersistTask};
use crate::storage::{JsonPeerFile, PeerPersistence, PeerStore};

pub struct MeshNode {
    config: Config,
    identity: Arc<NodeInfo>,
    peers: Arc<PeerStore>,
    persistence: Arc<dyn PeerPersistence>,
}

impl MeshNode {
    /// Build the node from configuration, loading the peer database from disk.
    pub async fn open(config: Config) -> Result<Self> {
        let backend = JsonPeerFile::new(config.peer_db_path());
        Self::with_persistence(config, Arc::new(backend))
    }

    /// Build the node on top of an arbitrary persistence backend.
    pub fn with_persistence(config: Config, persistence: Arc<dyn PeerPersistence>) -> Result<Self> {
        let identity = Arc::new(build_identity(&config)?);
        let peers = match persistence.load() {
            Ok(snapshot) => {
                info!(
                    "Loaded {} peers ({} retired)",
                    snapshot.peers.len(),
                    snapshot.retired.len()
                );
                PeerStore::restore(snapshot)
            }
            Err(e) => {
                warn!("Could not load peer database, starting empty: {}", e);
                PeerStore::new()
            }
        };
        Ok(Self {
            config,
            identity,
            peers: Arc::new(peers),
            persistence,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn identity(&self) -> &Arc<NodeInfo> {
        &self.identity
    }

    pub fn peers(&self) -> &Arc<PeerStore> {
        &self.peers
    }

    pub fn responder(&self, transport: Arc<dyn Transport>) -> Responder {
        Responder::new(transport, self.peers.clone(), &self.config.autoresponder)
    }

    pub fn dispatcher(&self, transport: Arc<dyn Transport>) -> Dispatcher {
        let handler = Arc::new(self.responder(transport.clone()));
        Dispatcher::new(
            self.identity.clone(),
            self.peers.clone(),
            transport,
            handler,
        )
    }

    pub fn lifecycle(&self, transport: Arc<dyn Transport>) -> Lifecycle {
        Lifecycle::new(
            &self.config,
            self.identity.clone(),
            transport,
            self.peers.clone(),
            self.persistence.clone(),
        )
    }

    /// Run the dispatcher and the control loop until Ctrl-C or until the link closes
    /// the event stream, then flush the peer store one last time.
    pub async fn run_with(
        self,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<Inbound>,
    ) -> Result<()> {
        info!(
            "Node {} '{}' running",
            self.identity.user_id(),
            self.identity.long_name
        );
        let dispatcher = self.dispatcher(transport.clone());
        let lifecycle = self.lifecycle(transport);

        tokio::select! {
            _ = dispatcher.run(events) => {
                warn!("Radio link closed");
            }
            _ = lifecycle.start() => {}
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutdown requested");
            }
        }

        self.flush().await;
        Ok(())
    }

    /// Final write on the blocking pool. Waits for any write the control loop left in
    /// flight.
    async fn flush(&self) {
        let task = PersistTask::new(self.peers.clone(), self.persistence.clone());
        match tokio::task::spawn_blocking(move || task.persist_if_dirty()).await {
            Ok(_) if self.peers.needs_save() => {
                warn!("Peer database could not be saved on shutdown")
            }
            Ok(_) => {}
            Err(e) => warn!("Shutdown flush did not complete: {}", e),
        }
    }

    /// Run without a radio: sends are only logged and nothing is received.
    pub async fn run_dry(self) -> Result<()> {
        info!("Dry run: outgoing packets are logged, not sent");
        let (_events_tx, events) = mpsc::unbounded_channel();
        self.run_with(Arc::new(LogTransport), events).await
    }

    /// Run against the Meshtastic device configured in `[meshtastic]`, or `port` when
    /// given. Falls back to a dry run when the device cannot be opened, unless
    /// `require_device` is set.
    #[cfg(feature = "serial")]
    pub async fn run_serial(mut self, port: Option<String>) -> Result<()> {
        if let Some(port) = port {
            self.config.meshtastic.port = port;
        }
        match crate::meshtastic::serial::connect(&self.config.meshtastic).await {
            Ok((transport, events)) => self.run_with(Arc::new(transport), events).await,
            Err(e) if self.config.meshtastic.require_device => bail!(
                "Failed to open Meshtastic device {}: {}",
                self.config.meshtastic.port,
                e
            ),
            Err(e) => {
                warn!(
                    "Failed to open Meshtastic device {} ({}), continuing without radio",
                    self.config.meshtastic.port, e
                );
                self.run_dry().await
            }
        }
    }

    #[cfg(not(feature = "serial"))]
    pub async fn run_serial(self, _port: Option<String>) -> Result<()> {
        if self.config.meshtastic.require_device {
            bail!("Built without serial support but meshtastic.require_device is set");
        }
        warn!("Built without serial support, continuing without radio");
        self.run_dry().await
    }
}
