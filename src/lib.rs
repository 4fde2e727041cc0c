//! # Meshstation - Meshtastic Base Station Ingest
//!
//! Meshstation sits next to a Meshtastic device driver and turns the packets it decodes
//! (text messages, node announcements and device, network and environment telemetry)
//! into durable, queryable records in a key-value store. A node identity table keeps
//! the freshest known name and last-seen time for every station heard on the mesh.
//!
//! ## Features
//!
//! - **Bounded Ingest**: non-blocking hand-off from driver threads; overload sheds the newest packet.
//! - **Single Dispatcher**: store writes happen in arrival order, with one retry per failed write.
//! - **Normalization**: one canonical record per packet, out-of-range telemetry clamped.
//! - **Keyspaces**: `meshtastic:messages`, `meshtastic:nodes`, `meshtastic:telemetry:*` in sled.
//! - **Graceful Shutdown**: the in-flight packet finishes, the backlog is counted and discarded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshstation::ingest::{self, DispatcherConfig};
//! use meshstation::meshtastic::RawPacket;
//! use meshstation::storage::{KeyValueStore, SledStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store: Arc<dyn KeyValueStore> = Arc::new(SledStore::open("./data/meshstation")?);
//!     let (handle, dispatcher) = ingest::start(store, 10_000, DispatcherConfig::default());
//!
//!     // Called from the device driver's receive callback, on any thread.
//!     handle.submit(RawPacket::text_message("!ab12cd34", "^all", "hello"));
//!
//!     let stats = dispatcher.shutdown().await;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`meshtastic`] - decoded packet model and packet sources
//! - [`ingest`] - queue, normalizer and dispatcher
//! - [`record`] - canonical record shapes
//! - [`storage`] - keyspace layout and store backends
//! - [`nodes`] - node identity tracker
//! - [`query`] / [`display`] - read side for console output
//! - [`maintenance`] - retention and corrupted-entry cleanup
//! - [`config`], [`logutil`], [`metrics`] - ambient plumbing
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Device source  │ ← driver thread, JSON-lines feed
//! └─────────────────┘
//!          │ try_send
//! ┌─────────────────┐
//! │  Ingest queue   │ ← bounded, sheds newest
//! └─────────────────┘
//!          │
//! ┌─────────────────┐      ┌──────────────┐
//! │   Dispatcher    │ ───→ │  Key-value   │ ←── query / display
//! │  (normalize)    │      │    store     │
//! └─────────────────┘      └──────────────┘
//! ```

pub mod config;
pub mod display;
pub mod ingest;
pub mod logutil;
pub mod maintenance;
pub mod meshtastic;
pub mod metrics;
pub mod nodes;
pub mod query;
pub mod record;
pub mod storage;
