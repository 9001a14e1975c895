//! Packet and node records exchanged between the transport and the controller.

use serde::{Deserialize, Serialize};

/// Destination id meaning "deliver to every reachable node".
pub const BROADCAST_ADDR: u32 = 0xFFFF_FFFF;

/// Channel index of the primary (administrative) channel.
pub const PRIMARY_CHANNEL: u8 = 0;

/// Role code of a plain CLIENT node.
pub const ROLE_CLIENT: i32 = 0;

/// Human-readable name of a Meshtastic device role code.
pub fn role_name(role: i32) -> &'static str {
    match role {
        0 => "CLIENT",
        1 => "CLIENT_MUTE",
        2 => "ROUTER",
        3 => "ROUTER_CLIENT",
        4 => "REPEATER",
        5 => "TRACKER",
        6 => "SENSOR",
        7 => "TAK",
        8 => "CLIENT_HIDDEN",
        9 => "LOST_AND_FOUND",
        10 => "TAK_TRACKER",
        11 => "ROUTER_LATE",
        _ => "UNKNOWN",
    }
}

/// Metadata of one received packet. Only valid for the duration of a handler call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketHeader {
    pub from: u32,
    /// [`BROADCAST_ADDR`] for broadcasts.
    pub to: u32,
    /// Channel the packet arrived on, as reported by the transport.
    pub channel: u8,
    pub id: u32,
    pub hop_start: u8,
    /// Hops remaining when the packet reached us.
    pub hop_limit: u8,
    pub rssi: f32,
    pub snr: f32,
}

impl PacketHeader {
    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_ADDR
    }

    /// Relays traversed, or `None` when the counters do not give a positive count
    /// (direct reception, or a transport that reports inconsistent counters).
    pub fn hops_away(&self) -> Option<u8> {
        let hops = i16::from(self.hop_start) - i16::from(self.hop_limit);
        if hops > 0 {
            u8::try_from(hops).ok()
        } else {
            None
        }
    }
}

/// Body of a received text packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub text: String,
}

impl TextMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level.
    pub altitude: i32,
}

/// Identity record a node advertises about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: u32,
    pub short_name: String,
    pub long_name: String,
    pub role: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl NodeInfo {
    pub fn new(node_id: u32, short_name: &str, long_name: &str, role: i32) -> Self {
        Self {
            node_id,
            short_name: short_name.to_string(),
            long_name: long_name.to_string(),
            role,
            position: None,
        }
    }

    /// Meshtastic user id string, e.g. `!abbababa`.
    pub fn user_id(&self) -> String {
        format!("!{:08x}", self.node_id)
    }

    pub fn is_client_role(&self) -> bool {
        self.role == ROLE_CLIENT
    }
}

/// Payload class of an outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageKind {
    #[default]
    Text,
}

/// One outbound text send request handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingText {
    pub text: String,
    /// [`BROADCAST_ADDR`] or a node id.
    pub to: u32,
    pub channel: u8,
    pub kind: MessageKind,
    pub want_response: bool,
    /// Id of the packet this answers (0 when unsolicited).
    pub reply_id: u32,
    /// Marks the reply itself as a mesh-wide broadcast. Informational only; never
    /// requests an ACK from the firmware.
    pub broadcast: bool,
    pub priority: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(hop_start: u8, hop_limit: u8) -> PacketHeader {
        PacketHeader {
            from: 1,
            to: BROADCAST_ADDR,
            channel: 8,
            id: 7,
            hop_start,
            hop_limit,
            rssi: -100.0,
            snr: 1.0,
        }
    }

    #[test]
    fn hops_away_positive_difference() {
        assert_eq!(header(5, 3).hops_away(), Some(2));
        assert_eq!(header(7, 0).hops_away(), Some(7));
    }

    #[test]
    fn hops_away_unknown_when_not_positive() {
        assert_eq!(header(5, 5).hops_away(), None);
        assert_eq!(header(0, 0).hops_away(), None);
        assert_eq!(header(2, 6).hops_away(), None);
    }

    #[test]
    fn user_id_is_lower_hex() {
        let info = NodeInfo::new(0xABBA_BABA, "Info", "Info node", 1);
        assert_eq!(info.user_id(), "!abbababa");
        assert!(!info.is_client_role());
    }

    #[test]
    fn unknown_position_is_omitted_from_json() {
        let info = NodeInfo::new(1, "A", "B", 0);
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("position"));
        let back: NodeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
