//! Delivery of inbound radio events to the handler.
//!
//! The dispatcher is the single consumer of the link's event stream. It owns the
//! transport-side duties (peer bookkeeping, answering NodeInfo requests, dropping our
//! own echoes) so the handler only sees packets from other nodes, one at a time.

use log::{debug, info, trace, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::packet::Inbound;
use super::types::{role_name, NodeInfo, PacketHeader, TextMessage};
use super::{MeshHandler, Transport};
use crate::logutil::escape_log;
use crate::storage::PeerStore;

pub struct Dispatcher {
    identity: Arc<NodeInfo>,
    peers: Arc<PeerStore>,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MeshHandler>,
    /// Node number of the attached device, once it told us.
    device_id: Option<u32>,
}

impl Dispatcher {
    pub fn new(
        identity: Arc<NodeInfo>,
        peers: Arc<PeerStore>,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn MeshHandler>,
    ) -> Self {
        Self {
            identity,
            peers,
            transport,
            handler,
            device_id: None,
        }
    }

    pub fn device_id(&self) -> Option<u32> {
        self.device_id
    }

    fn is_own(&self, node_id: u32) -> bool {
        node_id == self.identity.node_id || Some(node_id) == self.device_id
    }

    /// Consume events until the link closes the channel.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Inbound>) {
        info!("Dispatcher started");
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        info!("Event stream closed, dispatcher stopping");
    }

    pub fn handle(&mut self, event: Inbound) {
        match event {
            Inbound::Text { header, message } => self.handle_text(&header, &message),
            Inbound::NodeInfo {
                header,
                info,
                want_response,
            } => self.handle_node_info(&header, info, want_response),
            Inbound::Position { from, position } => {
                if self.is_own(from) {
                    return;
                }
                if self.peers.update_position(from, position) {
                    debug!(
                        "Position of 0x{:08x}: {:.5}, {:.5} alt {}",
                        from, position.latitude, position.longitude, position.altitude
                    );
                }
            }
            Inbound::MyNode(id) => {
                if id != self.identity.node_id {
                    debug!(
                        "Attached device is 0x{:08x}, configured identity is {}",
                        id,
                        self.identity.user_id()
                    );
                }
                self.device_id = Some(id);
            }
            Inbound::KnownNode(info) => {
                if self.is_own(info.node_id) {
                    return;
                }
                let update = self.peers.upsert(info);
                trace!("Seeded peer from device node db (new={})", update.is_new);
            }
            Inbound::ConfigComplete(id) => {
                info!(
                    "Device config sync complete (id=0x{:08x}), {} known peers",
                    id,
                    self.peers.len()
                );
            }
        }
    }

    fn handle_text(&self, header: &PacketHeader, message: &TextMessage) {
        if self.is_own(header.from) {
            trace!("Ignoring own text packet id={}", header.id);
            return;
        }
        self.handler.on_text_message(header, message);
    }

    fn handle_node_info(&self, header: &PacketHeader, info: NodeInfo, want_response: bool) {
        if self.is_own(header.from) {
            return;
        }
        let update = self.peers.upsert(info.clone());
        if update.is_new {
            info!(
                "New peer {} '{}' ({}) role={}",
                info.user_id(),
                escape_log(&info.long_name),
                escape_log(&info.short_name),
                role_name(info.role)
            );
        }
        if want_response {
            if let Err(e) = self
                .transport
                .send_node_info(&self.identity, header.from, false)
            {
                warn!(
                    "Failed to answer NodeInfo request from 0x{:08x}: {}",
                    header.from, e
                );
            }
        }
        self.handler
            .on_node_info(header, &info, want_response, update.is_new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meshtastic::types::{OutgoingText, Position, BROADCAST_ADDR};
    use crate::meshtastic::TransportError;
    use std::sync::Mutex;

    const SELF_ID: u32 = 0xABBA_BABA;

    #[derive(Default)]
    struct Sink {
        node_infos: Mutex<Vec<(u32, bool)>>,
    }

    impl Transport for Sink {
        fn send_text(&self, _msg: OutgoingText) -> Result<(), TransportError> {
            Ok(())
        }

        fn send_node_info(
            &self,
            _info: &NodeInfo,
            to: u32,
            want_response: bool,
        ) -> Result<(), TransportError> {
            self.node_infos.lock().unwrap().push((to, want_response));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Calls {
        texts: Mutex<Vec<String>>,
        node_infos: Mutex<Vec<(u32, bool, bool)>>,
    }

    impl MeshHandler for Calls {
        fn on_text_message(&self, _header: &PacketHeader, message: &TextMessage) {
            self.texts.lock().unwrap().push(message.text.clone());
        }

        fn on_node_info(
            &self,
            header: &PacketHeader,
            _info: &NodeInfo,
            needs_reply: bool,
            is_new_peer: bool,
        ) {
            self.node_infos
                .lock()
                .unwrap()
                .push((header.from, needs_reply, is_new_peer));
        }
    }

    fn header(from: u32) -> PacketHeader {
        PacketHeader {
            from,
            to: BROADCAST_ADDR,
            channel: 0,
            id: 1,
            hop_start: 3,
            hop_limit: 3,
            rssi: -90.0,
            snr: 4.0,
        }
    }

    fn setup() -> (Dispatcher, Arc<Sink>, Arc<Calls>, Arc<PeerStore>) {
        let sink = Arc::new(Sink::default());
        let calls = Arc::new(Calls::default());
        let peers = Arc::new(PeerStore::new());
        let identity = Arc::new(NodeInfo::new(SELF_ID, "Info", "Info node", 1));
        let d = Dispatcher::new(identity, peers.clone(), sink.clone(), calls.clone());
        (d, sink, calls, peers)
    }

    #[test]
    fn node_info_upserts_before_handler_and_flags_new_once() {
        let (mut d, _sink, calls, peers) = setup();
        let info = NodeInfo::new(0x1111, "NEW", "Newcomer", 0);
        for _ in 0..2 {
            d.handle(Inbound::NodeInfo {
                header: header(0x1111),
                info: info.clone(),
                want_response: false,
            });
        }
        assert!(peers.contains(0x1111));
        assert_eq!(
            *calls.node_infos.lock().unwrap(),
            vec![(0x1111, false, true), (0x1111, false, false)]
        );
    }

    #[test]
    fn want_response_is_answered_directly() {
        let (mut d, sink, _calls, _peers) = setup();
        d.handle(Inbound::NodeInfo {
            header: header(0x2222),
            info: NodeInfo::new(0x2222, "Q", "Asker", 2),
            want_response: true,
        });
        assert_eq!(*sink.node_infos.lock().unwrap(), vec![(0x2222, false)]);
    }

    #[test]
    fn own_packets_are_dropped() {
        let (mut d, _sink, calls, peers) = setup();
        d.handle(Inbound::Text {
            header: header(SELF_ID),
            message: TextMessage::new("ping"),
        });
        d.handle(Inbound::MyNode(0x7777));
        d.handle(Inbound::Text {
            header: header(0x7777),
            message: TextMessage::new("ping"),
        });
        d.handle(Inbound::NodeInfo {
            header: header(0x7777),
            info: NodeInfo::new(0x7777, "DEV", "Device", 0),
            want_response: false,
        });
        assert!(calls.texts.lock().unwrap().is_empty());
        assert!(calls.node_infos.lock().unwrap().is_empty());
        assert!(peers.is_empty());
        assert_eq!(d.device_id(), Some(0x7777));
    }

    #[test]
    fn known_nodes_seed_store_without_handler() {
        let (mut d, _sink, calls, peers) = setup();
        d.handle(Inbound::KnownNode(NodeInfo::new(0x3333, "OLD", "Old timer", 0)));
        assert!(peers.contains(0x3333));
        assert!(calls.node_infos.lock().unwrap().is_empty());

        // A later announcement from a seeded peer is not a new peer.
        d.handle(Inbound::NodeInfo {
            header: header(0x3333),
            info: NodeInfo::new(0x3333, "OLD", "Old timer", 0),
            want_response: false,
        });
        assert_eq!(
            *calls.node_infos.lock().unwrap(),
            vec![(0x3333, false, false)]
        );
    }

    #[test]
    fn position_updates_known_peer() {
        let (mut d, _sink, _calls, peers) = setup();
        peers.upsert(NodeInfo::new(0x4444, "GPS", "Tracker", 5));
        let position = Position {
            latitude: 46.25,
            longitude: 20.15,
            altitude: 80,
        };
        d.handle(Inbound::Position {
            from: 0x4444,
            position,
        });
        assert_eq!(peers.get(0x4444).unwrap().position, Some(position));
    }

    #[tokio::test]
    async fn run_drains_channel_then_returns() {
        let (d, _sink, calls, _peers) = setup();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Inbound::Text {
            header: header(0x5555),
            message: TextMessage::new("hello"),
        })
        .unwrap();
        drop(tx);
        d.run(rx).await;
        assert_eq!(*calls.texts.lock().unwrap(), vec!["hello".to_string()]);
    }
}
