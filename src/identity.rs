//! This node's identity record.
//!
//! The NodeInfo we announce is built once at startup from `[node]`. Encryption keys
//! stay on the attached device; the announcement carries no public key of our own.

use anyhow::Result;

use crate::config::Config;
use crate::meshtastic::{NodeInfo, Position};

/// Build the NodeInfo this node announces.
pub fn build_identity(config: &Config) -> Result<NodeInfo> {
    let node = &config.node;
    let mut info = NodeInfo::new(
        config.node_id()?,
        node.short_name.trim(),
        node.long_name.trim(),
        node.role,
    );
    info.position = node.position.map(|p| Position {
        latitude: p.latitude,
        longitude: p.longitude,
        altitude: p.altitude,
    });
    Ok(info)
}
