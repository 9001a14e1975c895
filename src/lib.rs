//! # MeshBaba - autoresponder for Meshtastic mesh nodes
//!
//! MeshBaba is the application-level controller of a mesh radio node. It keeps this
//! node's identity on the air, remembers the peers it has heard, and answers a small
//! set of text messages on the mesh.
//!
//! ## Features
//!
//! - **Autoresponder**: `ping`/`test`/`teszt` messages get a `Pong!` with the hop count
//!   or the received signal quality; `seq ` packet tests on a public channel get a
//!   polite warning.
//! - **Role advisory**: a peer announcing itself for the first time with the CLIENT role
//!   receives a one-shot suggestion to reconsider its role.
//! - **Node control loop**: periodic self-announcement and persistence of the peer
//!   database whenever it changed.
//! - **Meshtastic Integration**: talks to a Meshtastic device over USB/UART serial using
//!   the protobuf client API.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshbaba::config::Config;
//! use meshbaba::node::MeshNode;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let node = MeshNode::open(config).await?;
//!     node.run_dry().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`responder`] - message classification and reply generation
//! - [`scheduler`] - periodic announce / persist control loop
//! - [`storage`] - peer database with dirty tracking and JSON persistence
//! - [`meshtastic`] - transport: protobuf subset, framing, serial link, dispatch
//! - [`identity`] - this node's identity record built from configuration
//! - [`node`] - the context object wiring everything together
//! - [`config`] - configuration management and validation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐      ┌─────────────────┐
//! │   Dispatcher    │ ───► │   Responder     │ ← classify + compose replies
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌─────────────────┐      ┌─────────────────┐
//! │   Peer Store    │ ◄─── │   Scheduler     │ ← announce + persist-if-dirty
//! └─────────────────┘      └─────────────────┘
//!          │                        │
//! ┌──────────────────────────────────────────┐
//! │   Transport (Meshtastic serial / log)    │
//! └──────────────────────────────────────────┘
//! ```

pub mod config;
pub mod identity;
pub mod logutil;
pub mod meshtastic;
pub mod node;
pub mod responder;
pub mod scheduler;
pub mod storage;
