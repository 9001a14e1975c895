//! # Configuration Management Module
//!
//! All runtime settings of the node live in one TOML file (default `config.toml`).
//! Every section has sensible defaults so a freshly generated file from
//! `meshbaba init` works unchanged against a Meshtastic device on `/dev/ttyUSB0`.
//!
//! ## Configuration Structure
//!
//! - [`NodeConfig`] - this node's identity (id, names, role, position)
//! - [`MeshtasticConfig`] - device link and outgoing packet settings
//! - [`SchedulerConfig`] - control loop tick and announce cadence
//! - [`AutoresponderConfig`] - trigger prefixes and reply texts
//! - [`StorageConfig`] - peer database location and pruning
//! - [`LoggingConfig`] - log level and optional log file
//!
//! ## Configuration File Format
//!
//! ```toml
//! [node]
//! node_id = "0xabbababa"
//! short_name = "Info"
//! long_name = "Hungarian Info Node"
//! role = 1
//!
//! [node.position]
//! latitude = 47.486
//! longitude = 19.078
//! altitude = 100
//!
//! [meshtastic]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [scheduler]
//! tick_ms = 100
//! announce_interval_secs = 1800
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Longest short name Meshtastic clients display.
pub const MAX_SHORT_NAME_CHARS: usize = 4;
/// Longest long name accepted by the device firmware (bytes).
pub const MAX_LONG_NAME_BYTES: usize = 39;
/// Meshtastic caps the hop limit of outgoing packets at 7.
pub const MAX_HOP_LIMIT: u32 = 7;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub meshtastic: MeshtasticConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub autoresponder: AutoresponderConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node number, decimal or `0x` prefixed hex.
    pub node_id: String,
    pub short_name: String,
    pub long_name: String,
    /// Device role code announced to the mesh (0 = CLIENT, 1 = CLIENT_MUTE, ...).
    #[serde(default = "default_role")]
    pub role: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionConfig>,
}

fn default_role() -> i32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionConfig {
    pub latitude: f64,
    pub longitude: f64,
    /// Metres above sea level.
    #[serde(default)]
    pub altitude: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshtasticConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Hop limit stamped on packets we originate.
    #[serde(default = "default_hop_limit")]
    pub hop_limit: u32,
    /// When false the node only listens; outgoing packets are logged and dropped.
    #[serde(default = "default_true")]
    pub send_enabled: bool,
    /// Allow our packets to be forwarded to MQTT by gateways.
    #[serde(default = "default_true")]
    pub ok_to_mqtt: bool,
    /// Interval between serial API heartbeats (seconds, 0 disables).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Exit instead of falling back to the log-only transport when the device
    /// cannot be opened at startup.
    #[serde(default)]
    pub require_device: bool,
}

fn default_hop_limit() -> u32 {
    MAX_HOP_LIMIT
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Control loop tick period in milliseconds.
    pub tick_ms: u64,
    /// How often this node re-announces its NodeInfo (seconds).
    pub announce_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            announce_interval_secs: 30 * 60,
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_ms)
    }

    /// Number of ticks between two announcements (at least 1).
    pub fn announce_every_ticks(&self) -> u64 {
        if self.tick_ms == 0 {
            return 1;
        }
        (self.announce_interval_secs.saturating_mul(1000) / self.tick_ms).max(1)
    }

    /// Number of ticks in one hour, used for peer pruning.
    pub fn hourly_ticks(&self) -> u64 {
        if self.tick_ms == 0 {
            return 1;
        }
        (3_600_000 / self.tick_ms).max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoresponderConfig {
    /// Body prefixes answered with a pong (case-insensitive).
    pub pong_prefixes: Vec<String>,
    /// Body prefixes that look like a sequence/packet test (case-insensitive).
    pub seq_prefixes: Vec<String>,
    /// Text sent after `"{sender}! "` in reply to a sequence test.
    pub seq_warning: String,
    /// Text sent after `"{short_name}! "` to new peers announcing the CLIENT role.
    pub role_advice: String,
    pub role_advice_link: String,
}

impl Default for AutoresponderConfig {
    fn default() -> Self {
        Self {
            pong_prefixes: vec!["ping".into(), "test".into(), "teszt".into()],
            seq_prefixes: vec!["seq ".into()],
            seq_warning: "Please don't run packet tests on a public channel. Everyone sees them!"
                .into(),
            role_advice: "please reconsider whether CLIENT role is right for you, see".into(),
            role_advice_link: "https://meshtastic.creativo.hu".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
    /// Peer database file name inside `data_dir`.
    #[serde(default = "default_peer_db")]
    pub peer_db: String,
    /// Forget peers not heard for this many days (0 keeps them forever).
    #[serde(default)]
    pub stale_peer_days: u32,
}

fn default_peer_db() -> String {
    "nodedb.json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Config {
    /// Load configuration from a file and validate it.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.normalize();
        config
            .validate()
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Lower-case trigger prefixes and drop empty ones so matching stays a plain
    /// ASCII-folded prefix test.
    pub fn normalize(&mut self) {
        for list in [
            &mut self.autoresponder.pong_prefixes,
            &mut self.autoresponder.seq_prefixes,
        ] {
            list.retain(|p| !p.is_empty());
            for p in list.iter_mut() {
                *p = p.to_ascii_lowercase();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        parse_node_id(&self.node.node_id)?;

        let short = self.node.short_name.trim();
        if short.is_empty() {
            bail!("node.short_name must not be empty");
        }
        if short.chars().count() > MAX_SHORT_NAME_CHARS {
            bail!(
                "node.short_name '{}' is longer than {} characters",
                short,
                MAX_SHORT_NAME_CHARS
            );
        }
        if self.node.long_name.len() > MAX_LONG_NAME_BYTES {
            bail!(
                "node.long_name is longer than {} bytes",
                MAX_LONG_NAME_BYTES
            );
        }
        if let Some(pos) = self.node.position {
            if !(-90.0..=90.0).contains(&pos.latitude) || !(-180.0..=180.0).contains(&pos.longitude)
            {
                bail!(
                    "node.position out of range: lat={} lon={}",
                    pos.latitude,
                    pos.longitude
                );
            }
        }
        if self.meshtastic.hop_limit == 0 || self.meshtastic.hop_limit > MAX_HOP_LIMIT {
            bail!(
                "meshtastic.hop_limit must be between 1 and {}",
                MAX_HOP_LIMIT
            );
        }
        if self.scheduler.tick_ms == 0 {
            bail!("scheduler.tick_ms must be greater than zero");
        }
        if self.scheduler.announce_interval_secs.saturating_mul(1000) < self.scheduler.tick_ms {
            bail!("scheduler.announce_interval_secs must cover at least one tick");
        }
        if self.storage.peer_db.trim().is_empty() {
            bail!("storage.peer_db must not be empty");
        }
        Ok(())
    }

    pub fn node_id(&self) -> Result<u32> {
        parse_node_id(&self.node.node_id)
    }

    pub fn peer_db_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir).join(&self.storage.peer_db)
    }
}

/// Parse a node number given as decimal, `0x`/`0X` hex, or Meshtastic `!abcd1234` form.
pub fn parse_node_id(raw: &str) -> Result<u32> {
    let s = raw.trim();
    let parsed = if let Some(hex) = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('!'))
    {
        u32::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u32>().ok()
    };
    match parsed {
        Some(0) | Some(0xFFFF_FFFF) => Err(anyhow!("node id '{}' is reserved", raw)),
        Some(id) => Ok(id),
        None => Err(anyhow!("invalid node id '{}'", raw)),
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            node: NodeConfig {
                node_id: "0xabbababa".to_string(),
                short_name: "Info".to_string(),
                long_name: "Hungarian Info Node".to_string(),
                role: default_role(),
                position: Some(PositionConfig {
                    latitude: 47.486,
                    longitude: 19.078,
                    altitude: 100,
                }),
            },
            meshtastic: MeshtasticConfig {
                port: "/dev/ttyUSB0".to_string(),
                baud_rate: 115200,
                hop_limit: MAX_HOP_LIMIT,
                send_enabled: true,
                ok_to_mqtt: true,
                heartbeat_interval_secs: default_heartbeat_interval(),
                require_device: false,
            },
            scheduler: SchedulerConfig::default(),
            autoresponder: AutoresponderConfig::default(),
            storage: StorageConfig {
                data_dir: "./data".to_string(),
                peer_db: default_peer_db(),
                stale_peer_days: 0,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("meshbaba.log".to_string()),
            },
        }
    }
}
