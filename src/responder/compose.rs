//! Reply texts and routing.

use crate::meshtastic::{PacketHeader, BROADCAST_ADDR, PRIMARY_CHANNEL};
use crate::storage::PeerStore;

/// Where a reply to a given packet goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyRoute {
    pub to: u32,
    pub channel: u8,
}

impl ReplyRoute {
    /// Broadcasts are answered on the same channel; direct messages privately on the
    /// primary channel.
    pub fn for_header(header: &PacketHeader) -> Self {
        if header.is_broadcast() {
            Self {
                to: BROADCAST_ADDR,
                channel: header.channel,
            }
        } else {
            Self {
                to: header.from,
                channel: PRIMARY_CHANNEL,
            }
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_ADDR
    }
}

/// Short name of a known peer, otherwise the node id as `0xDEADBEEF`.
pub fn display_name(peers: &PeerStore, node_id: u32) -> String {
    peers
        .short_name(node_id)
        .unwrap_or_else(|| format!("0x{:08X}", node_id))
}

pub fn pong_text(header: &PacketHeader) -> String {
    let detail = match header.hops_away() {
        Some(hops) => format!(" (hops: {})", hops),
        None => format!(
            " (rssi: {:.1} dBm, snr: {:.1} dB)",
            header.rssi, header.snr
        ),
    };
    format!("Pong! {}", detail)
}

pub fn seq_text(sender: &str, warning: &str) -> String {
    format!("{}! {}", sender, warning)
}

pub fn advisory_text(short_name: &str, advice: &str, link: &str) -> String {
    if link.is_empty() {
        format!("{}! {}", short_name, advice)
    } else {
        format!("{}! {} {}", short_name, advice, link)
    }
}
