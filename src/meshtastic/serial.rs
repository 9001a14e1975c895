//! Serial link to a Meshtastic device.
//!
//! One port is shared by two workers:
//!
//! - the reader (blocking thread) pulls bytes, runs them through the [`StreamFramer`]
//!   and forwards decoded [`Inbound`] events to the dispatcher;
//! - the writer (tokio task) drains queued `ToRadio` messages, requests the device
//!   config once at startup and sends periodic heartbeats so the device keeps the API
//!   session open.
//!
//! Both stop on their own once the other side of their channel is gone.

use log::{debug, info, trace, warn};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::framer::StreamFramer;
use super::packet::{
    decode_from_radio, encode_to_radio, heartbeat, next_packet_id, node_info_packet,
    position_packet, text_packet, want_config, Inbound, PacketSettings,
};
use super::proto;
use super::types::{NodeInfo, OutgoingText, BROADCAST_ADDR};
use super::{Transport, TransportError};
use crate::config::MeshtasticConfig;
use crate::logutil::{escape_log, hex_snippet};

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

const IDLE_POLL: Duration = Duration::from_millis(10);
/// Console bytes tolerated before warning that the device is not in PROTO mode.
const PROTO_HINT_BYTES: usize = 4096;

async fn open_shared_port(port_name: &str, baud_rate: u32) -> Result<SharedPort, TransportError> {
    debug!("Opening serial port {} at {} baud", port_name, baud_rate);

    let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(100));
    #[cfg(unix)]
    {
        builder = builder
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
    }
    let mut port = builder.open()?;

    // Toggle DTR/RTS to make sure the device wakes up.
    let _ = port.write_data_terminal_ready(true);
    let _ = port.write_request_to_send(true);
    sleep(Duration::from_millis(150)).await;

    // Drop boot text already sitting in the buffer.
    let _ = port.clear(serialport::ClearBuffer::Input);

    Ok(Arc::new(Mutex::new(port)))
}

/// [`Transport`] backed by the serial writer task.
#[derive(Debug, Clone)]
pub struct SerialTransport {
    outgoing: mpsc::UnboundedSender<proto::ToRadio>,
    settings: PacketSettings,
    send_enabled: bool,
}

impl SerialTransport {
    fn queue(&self, msg: proto::ToRadio) -> Result<(), TransportError> {
        self.outgoing.send(msg).map_err(|_| TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn send_text(&self, msg: OutgoingText) -> Result<(), TransportError> {
        if !self.send_enabled {
            return Err(TransportError::SendDisabled);
        }
        let id = next_packet_id();
        debug!(
            "Queue text id=0x{:08x} to=0x{:08x} ch={}: {}",
            id,
            msg.to,
            msg.channel,
            escape_log(&msg.text)
        );
        self.queue(text_packet(&msg, &self.settings, id))
    }

    fn send_node_info(
        &self,
        info: &NodeInfo,
        to: u32,
        want_response: bool,
    ) -> Result<(), TransportError> {
        if !self.send_enabled {
            return Err(TransportError::SendDisabled);
        }
        self.queue(node_info_packet(
            info,
            to,
            want_response,
            &self.settings,
            next_packet_id(),
        ))?;
        // Announcements carry our position along when one is configured.
        if to == BROADCAST_ADDR {
            if let Some(pos) = &info.position {
                self.queue(position_packet(pos, &self.settings, next_packet_id()))?;
            }
        }
        Ok(())
    }
}

/// Open the device and start the reader and writer workers.
///
/// Returns the send side and the stream of decoded events for the dispatcher.
pub async fn connect(
    cfg: &MeshtasticConfig,
) -> Result<(SerialTransport, mpsc::UnboundedReceiver<Inbound>), TransportError> {
    let port = open_shared_port(&cfg.port, cfg.baud_rate).await?;
    info!("Connected to Meshtastic device on {}", cfg.port);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let reader_port = port.clone();
    tokio::task::spawn_blocking(move || read_loop(reader_port, event_tx));

    let heartbeat_every = (cfg.heartbeat_interval_secs > 0)
        .then(|| Duration::from_secs(cfg.heartbeat_interval_secs));
    tokio::spawn(write_loop(port, out_rx, heartbeat_every));

    let transport = SerialTransport {
        outgoing: out_tx,
        settings: PacketSettings {
            hop_limit: cfg.hop_limit,
            ok_to_mqtt: cfg.ok_to_mqtt,
        },
        send_enabled: cfg.send_enabled,
    };
    Ok((transport, event_rx))
}

fn read_loop(port: SharedPort, events: mpsc::UnboundedSender<Inbound>) {
    info!("Serial reader started");
    let mut framer = StreamFramer::new();
    let mut buffer = [0u8; 1024];
    let mut bytes_read = 0usize;
    let mut mode_reported = false;
    while !events.is_closed() {
        let result = {
            let mut port = port.lock().unwrap_or_else(PoisonError::into_inner);
            match port.bytes_to_read() {
                Ok(0) => Ok(0),
                Ok(_) => port.read(&mut buffer),
                Err(e) => Err(std::io::Error::from(e)),
            }
        };
        match result {
            Ok(0) => std::thread::sleep(IDLE_POLL),
            Ok(n) => {
                trace!("RAW {} bytes: {}", n, hex_snippet(&buffer[..n], 64));
                framer.push(&buffer[..n]);
                while let Some(frame) = framer.next_frame() {
                    match decode_from_radio(&frame) {
                        Ok(Some(event)) => {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => debug!(
                            "Undecodable frame ({} bytes): {} [{}]",
                            frame.len(),
                            e,
                            hex_snippet(&frame, 32)
                        ),
                    }
                }
                bytes_read = bytes_read.saturating_add(n);
                if !mode_reported {
                    if framer.binary_detected() {
                        info!("Device is speaking the protobuf API");
                        mode_reported = true;
                    } else if bytes_read >= PROTO_HINT_BYTES {
                        warn!(
                            "No protobuf frames in the first {} bytes; is serial.mode set to PROTO?",
                            bytes_read
                        );
                        mode_reported = true;
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("Serial read error (continuing): {}", e);
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
    info!("Serial reader stopped");
}

fn write_frame(port: &SharedPort, msg: &proto::ToRadio) -> Result<(), TransportError> {
    let bytes = encode_to_radio(msg)?;
    let mut port = port.lock().unwrap_or_else(PoisonError::into_inner);
    port.write_all(&bytes)?;
    port.flush()?;
    Ok(())
}

async fn write_loop(
    port: SharedPort,
    mut outgoing: mpsc::UnboundedReceiver<proto::ToRadio>,
    heartbeat_every: Option<Duration>,
) {
    info!("Serial writer started");

    let config_id = next_packet_id();
    info!(
        "Requesting initial config from radio (want_config_id=0x{:08x})",
        config_id
    );
    if let Err(e) = write_frame(&port, &want_config(config_id)) {
        warn!("Initial config request failed: {}", e);
    }

    // A disabled heartbeat still needs a period for the interval.
    let period = heartbeat_every.unwrap_or(Duration::from_secs(3600));
    let mut heartbeat_timer = tokio::time::interval(period);
    heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat_timer.tick().await;

    loop {
        tokio::select! {
            msg = outgoing.recv() => {
                let Some(msg) = msg else { break };
                if let Err(e) = write_frame(&port, &msg) {
                    warn!("Serial write failed: {}", e);
                }
            }
            _ = heartbeat_timer.tick(), if heartbeat_every.is_some() => {
                if let Err(e) = write_frame(&port, &heartbeat()) {
                    debug!("Heartbeat send error: {}", e);
                }
            }
        }
    }
    info!("Serial writer stopped");
}
