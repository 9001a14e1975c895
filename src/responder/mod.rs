//! # Autoresponder
//!
//! The [`Responder`] is this node's [`MeshHandler`]. It answers:
//!
//! - pong-like messages (`ping`, `test`, `teszt`) with the hop count, or with the
//!   received signal quality when the packet came in directly;
//! - sequence tests (`seq `) with a reminder not to flood public channels;
//! - a peer's first NodeInfo announcing the CLIENT role with a one-shot advisory.
//!
//! Replies to broadcasts go back to the same channel; replies to direct messages go
//! privately to the sender on the primary channel. Sends are fire-and-forget: a failed
//! send is logged and dropped.

pub mod classify;
pub mod compose;

pub use classify::{classify, Classifier, ReplyIntents};
pub use compose::{advisory_text, display_name, pong_text, seq_text, ReplyRoute};

use log::{debug, info, warn};
use std::sync::Arc;

use crate::config::AutoresponderConfig;
use crate::logutil::escape_log;
use crate::meshtastic::{
    MeshHandler, MessageKind, NodeInfo, OutgoingText, PacketHeader, TextMessage, Transport,
    PRIMARY_CHANNEL,
};
use crate::storage::PeerStore;

pub struct Responder {
    transport: Arc<dyn Transport>,
    peers: Arc<PeerStore>,
    classifier: Classifier,
    seq_warning: String,
    role_advice: String,
    role_advice_link: String,
}

impl Responder {
    pub fn new(
        transport: Arc<dyn Transport>,
        peers: Arc<PeerStore>,
        cfg: &AutoresponderConfig,
    ) -> Self {
        Self {
            transport,
            peers,
            classifier: Classifier::from_config(cfg),
            seq_warning: cfg.seq_warning.clone(),
            role_advice: cfg.role_advice.clone(),
            role_advice_link: cfg.role_advice_link.clone(),
        }
    }

    /// Send `text` along `route`. `reply_id` is the packet answered, 0 when unsolicited.
    fn reply(&self, reply_id: u32, route: ReplyRoute, text: String, broadcast: bool) {
        let msg = OutgoingText {
            text,
            to: route.to,
            channel: route.channel,
            kind: MessageKind::Text,
            want_response: false,
            reply_id,
            broadcast,
            priority: 0,
        };
        let summary = format!(
            "to=0x{:08x} ch={}: {}",
            msg.to,
            msg.channel,
            escape_log(&msg.text)
        );
        match self.transport.send_text(msg) {
            Ok(()) => info!("Reply {}", summary),
            Err(e) => warn!("Reply {} not sent: {}", summary, e),
        }
    }
}

impl MeshHandler for Responder {
    fn on_text_message(&self, header: &PacketHeader, message: &TextMessage) {
        let sender = display_name(&self.peers, header.from);
        let route = ReplyRoute::for_header(header);
        info!(
            "{} from {} ch={}: {}",
            if route.is_broadcast() { "Broadcast" } else { "Direct" },
            sender,
            header.channel,
            escape_log(&message.text)
        );

        let intents = self.classifier.classify(&message.text);
        if intents.pong {
            self.reply(header.id, route, pong_text(header), route.is_broadcast());
        }
        if intents.seq {
            self.reply(
                header.id,
                route,
                seq_text(&sender, &self.seq_warning),
                false,
            );
        }
    }

    fn on_node_info(
        &self,
        header: &PacketHeader,
        info: &NodeInfo,
        _needs_reply: bool,
        is_new_peer: bool,
    ) {
        if !(is_new_peer && info.is_client_role()) {
            return;
        }
        debug!("New CLIENT peer {}, sending role advisory", info.user_id());
        let route = ReplyRoute {
            to: header.from,
            channel: PRIMARY_CHANNEL,
        };
        let text = advisory_text(&info.short_name, &self.role_advice, &self.role_advice_link);
        // Unsolicited: not an answer to the NodeInfo packet.
        self.reply(0, route, text, false);
    }
}
