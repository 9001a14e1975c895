//! # Meshtastic Device Communication Module
//!
//! Everything between the radio and the autoresponder: the protobuf subset of the
//! Meshtastic client API, the serial stream framer, translation of device packets into
//! [`Inbound`] events, the serial link itself and the [`Dispatcher`] that feeds events
//! to a [`MeshHandler`].
//!
//! ## Seams
//!
//! - [`Transport`] is the send primitive used by the responder and the scheduler. It is
//!   fire-and-forget: a successful return means the request was queued, not that the
//!   packet was delivered.
//! - [`MeshHandler`] receives decoded text and NodeInfo packets. Calls are serialized by
//!   the dispatcher, one at a time, in arrival order.
//!
//! ## Transports
//!
//! - `serial::SerialTransport` talks to a Meshtastic device over USB/UART (feature
//!   `serial`, enabled by default).
//! - [`LogTransport`] only logs what would have been sent. Used for `--dry-run` and when
//!   no device could be opened.
//!
//! ## Configuration
//!
//! ```toml
//! [meshtastic]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! hop_limit = 7
//! send_enabled = true
//! ok_to_mqtt = true
//! ```

pub mod dispatch;
pub mod framer;
pub mod packet;
pub mod proto;
#[cfg(feature = "serial")]
pub mod serial;
pub mod types;

pub use dispatch::Dispatcher;
pub use packet::{Inbound, PacketSettings};
pub use types::{
    role_name, MessageKind, NodeInfo, OutgoingText, PacketHeader, Position, TextMessage,
    BROADCAST_ADDR, PRIMARY_CHANNEL, ROLE_CLIENT,
};

use crate::logutil::escape_log;
use log::info;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport channel closed")]
    Closed,

    #[error("sending is disabled by configuration")]
    SendDisabled,

    #[error("failed to encode packet: {0}")]
    Encode(#[from] prost::EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serial")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Outbound side of the radio link.
pub trait Transport: Send + Sync {
    /// Queue a text message.
    fn send_text(&self, msg: OutgoingText) -> Result<(), TransportError>;

    /// Queue a NodeInfo packet describing `info` for `to` (usually [`BROADCAST_ADDR`]).
    fn send_node_info(
        &self,
        info: &NodeInfo,
        to: u32,
        want_response: bool,
    ) -> Result<(), TransportError>;
}

/// Receiver of decoded inbound packets.
pub trait MeshHandler: Send + Sync {
    fn on_text_message(&self, header: &PacketHeader, message: &TextMessage);

    /// `is_new_peer` is true the first time the peer is ever seen; a pruned peer that
    /// returns does not count.
    fn on_node_info(
        &self,
        header: &PacketHeader,
        info: &NodeInfo,
        needs_reply: bool,
        is_new_peer: bool,
    );
}

/// Transport that logs every request instead of transmitting it.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

impl Transport for LogTransport {
    fn send_text(&self, msg: OutgoingText) -> Result<(), TransportError> {
        info!(
            "[dry-run] text to=0x{:08x} ch={} reply_id={} broadcast={}: {}",
            msg.to,
            msg.channel,
            msg.reply_id,
            msg.broadcast,
            escape_log(&msg.text)
        );
        Ok(())
    }

    fn send_node_info(
        &self,
        info: &NodeInfo,
        to: u32,
        want_response: bool,
    ) -> Result<(), TransportError> {
        info!(
            "[dry-run] nodeinfo {} '{}' ({}) to=0x{:08x} want_response={}",
            info.user_id(),
            escape_log(&info.long_name),
            role_name(info.role),
            to,
            want_response
        );
        Ok(())
    }
}
