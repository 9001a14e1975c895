//! Translation between Meshtastic protobufs and the controller's packet records.
use log::{debug, trace};
use prost::Message;

use super::framer::encode_frame;
use super::proto::{self, from_radio, mesh_packet, to_radio, PortNum};
use super::types::{NodeInfo, OutgoingText, PacketHeader, Position, TextMessage, BROADCAST_ADDR};
use super::TransportError;

/// Bit in `Data.bitfield` allowing gateways to forward the packet to MQTT.
const BITFIELD_OK_TO_MQTT: u32 = 1;

/// Something the radio told us that the dispatcher cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A text packet addressed to us or broadcast on a channel we listen to.
    Text {
        header: PacketHeader,
        message: TextMessage,
    },
    /// A peer announced its identity.
    NodeInfo {
        header: PacketHeader,
        info: NodeInfo,
        want_response: bool,
    },
    /// A peer reported its position.
    Position { from: u32, position: Position },
    /// The attached device told us its node number.
    MyNode(u32),
    /// Entry of the device's node database sent during the config handshake.
    KnownNode(NodeInfo),
    ConfigComplete(u32),
}

/// Per-link settings stamped on every packet we originate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSettings {
    pub hop_limit: u32,
    pub ok_to_mqtt: bool,
}

impl Default for PacketSettings {
    fn default() -> Self {
        Self {
            hop_limit: 7,
            ok_to_mqtt: true,
        }
    }
}

fn clamp_u8(v: u32) -> u8 {
    u8::try_from(v).unwrap_or(u8::MAX)
}

pub fn header_from_packet(pkt: &proto::MeshPacket) -> PacketHeader {
    PacketHeader {
        from: pkt.from,
        to: pkt.to,
        channel: (pkt.channel & 0xFF) as u8,
        id: pkt.id,
        hop_start: clamp_u8(pkt.hop_start),
        hop_limit: clamp_u8(pkt.hop_limit),
        rssi: pkt.rx_rssi as f32,
        snr: pkt.rx_snr,
    }
}

pub fn position_from_proto(pos: &proto::Position) -> Option<Position> {
    match (pos.latitude_i, pos.longitude_i) {
        (Some(lat), Some(lon)) if lat != 0 || lon != 0 => Some(Position {
            latitude: f64::from(lat) * 1e-7,
            longitude: f64::from(lon) * 1e-7,
            altitude: pos.altitude.unwrap_or(0),
        }),
        _ => None,
    }
}

pub fn position_to_proto(pos: &Position) -> proto::Position {
    proto::Position {
        latitude_i: Some((pos.latitude * 1e7).round() as i32),
        longitude_i: Some((pos.longitude * 1e7).round() as i32),
        altitude: Some(pos.altitude),
        time: 0,
    }
}

pub fn node_info_from_user(num: u32, user: &proto::User) -> NodeInfo {
    NodeInfo {
        node_id: num,
        short_name: user.short_name.trim().to_string(),
        long_name: user.long_name.trim().to_string(),
        role: user.role,
        position: None,
    }
}

/// Decode one framed payload received from the device.
pub fn decode_from_radio(frame: &[u8]) -> Result<Option<Inbound>, prost::DecodeError> {
    let msg = proto::FromRadio::decode(frame)?;
    Ok(inbound_from(msg))
}

pub fn inbound_from(msg: proto::FromRadio) -> Option<Inbound> {
    match msg.payload_variant? {
        from_radio::PayloadVariant::Packet(pkt) => inbound_from_packet(pkt),
        from_radio::PayloadVariant::MyInfo(info) => Some(Inbound::MyNode(info.my_node_num)),
        from_radio::PayloadVariant::NodeInfo(n) => {
            let user = n.user.as_ref()?;
            let mut info = node_info_from_user(n.num, user);
            info.position = n.position.as_ref().and_then(position_from_proto);
            Some(Inbound::KnownNode(info))
        }
        from_radio::PayloadVariant::ConfigCompleteId(id) => Some(Inbound::ConfigComplete(id)),
        from_radio::PayloadVariant::Rebooted(_) => {
            debug!("Device reported a reboot");
            None
        }
    }
}

fn inbound_from_packet(pkt: proto::MeshPacket) -> Option<Inbound> {
    let header = header_from_packet(&pkt);
    let data = match pkt.payload_variant {
        Some(mesh_packet::PayloadVariant::Decoded(data)) => data,
        Some(mesh_packet::PayloadVariant::Encrypted(_)) => {
            trace!(
                "Skipping encrypted packet id={} from=0x{:08x}",
                pkt.id,
                pkt.from
            );
            return None;
        }
        None => return None,
    };
    match data.portnum() {
        PortNum::TextMessageApp => match String::from_utf8(data.payload) {
            Ok(text) => Some(Inbound::Text {
                header,
                message: TextMessage { text },
            }),
            Err(_) => {
                debug!(
                    "Dropping text packet id={} from=0x{:08x}: payload is not UTF-8",
                    header.id, header.from
                );
                None
            }
        },
        PortNum::NodeinfoApp => {
            let user = proto::User::decode(data.payload.as_slice()).ok()?;
            Some(Inbound::NodeInfo {
                header,
                info: node_info_from_user(header.from, &user),
                want_response: data.want_response,
            })
        }
        PortNum::PositionApp => {
            let pos = proto::Position::decode(data.payload.as_slice()).ok()?;
            position_from_proto(&pos).map(|position| Inbound::Position {
                from: header.from,
                position,
            })
        }
        other => {
            trace!("Ignoring {:?} packet from 0x{:08x}", other, header.from);
            None
        }
    }
}

fn data_bitfield(settings: &PacketSettings) -> Option<u32> {
    Some(if settings.ok_to_mqtt {
        BITFIELD_OK_TO_MQTT
    } else {
        0
    })
}

fn wrap_packet(
    to: u32,
    channel: u8,
    data: proto::Data,
    settings: &PacketSettings,
    id: u32,
    priority: u8,
) -> proto::ToRadio {
    let pkt = proto::MeshPacket {
        from: 0, // filled by firmware
        to,
        channel: u32::from(channel),
        id,
        hop_limit: settings.hop_limit,
        priority: i32::from(priority),
        payload_variant: Some(mesh_packet::PayloadVariant::Decoded(data)),
        ..Default::default()
    };
    proto::ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::Packet(pkt)),
    }
}

/// Build the ToRadio for a text send request.
pub fn text_packet(out: &OutgoingText, settings: &PacketSettings, id: u32) -> proto::ToRadio {
    let data = proto::Data {
        portnum: PortNum::TextMessageApp as i32,
        payload: out.text.as_bytes().to_vec(),
        want_response: out.want_response,
        reply_id: out.reply_id,
        bitfield: data_bitfield(settings),
        ..Default::default()
    };
    wrap_packet(out.to, out.channel, data, settings, id, out.priority)
}

/// Build the NODEINFO_APP packet announcing `info`.
pub fn node_info_packet(
    info: &NodeInfo,
    to: u32,
    want_response: bool,
    settings: &PacketSettings,
    id: u32,
) -> proto::ToRadio {
    let user = proto::User {
        id: info.user_id(),
        long_name: info.long_name.clone(),
        short_name: info.short_name.clone(),
        role: info.role,
        ..Default::default()
    };
    let data = proto::Data {
        portnum: PortNum::NodeinfoApp as i32,
        payload: user.encode_to_vec(),
        want_response,
        bitfield: data_bitfield(settings),
        ..Default::default()
    };
    wrap_packet(to, 0, data, settings, id, 0)
}

/// Build the POSITION_APP broadcast for our own position.
pub fn position_packet(pos: &Position, settings: &PacketSettings, id: u32) -> proto::ToRadio {
    let data = proto::Data {
        portnum: PortNum::PositionApp as i32,
        payload: position_to_proto(pos).encode_to_vec(),
        bitfield: data_bitfield(settings),
        ..Default::default()
    };
    wrap_packet(BROADCAST_ADDR, 0, data, settings, id, 0)
}

pub fn want_config(request_id: u32) -> proto::ToRadio {
    proto::ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::WantConfigId(request_id)),
    }
}

pub fn heartbeat() -> proto::ToRadio {
    proto::ToRadio {
        payload_variant: Some(to_radio::PayloadVariant::Heartbeat(proto::Heartbeat {})),
    }
}

/// Encode and frame a ToRadio for the serial link.
pub fn encode_to_radio(msg: &proto::ToRadio) -> Result<Vec<u8>, TransportError> {
    let mut payload = Vec::with_capacity(msg.encoded_len());
    msg.encode(&mut payload)?;
    Ok(encode_frame(&payload))
}

/// Random non-zero packet id.
pub fn next_packet_id() -> u32 {
    loop {
        let id = rand::random::<u32>();
        if id != 0 {
            return id;
        }
    }
}
