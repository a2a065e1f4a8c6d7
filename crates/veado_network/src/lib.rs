//! Veado Network: keeps a live link to a veadotube peer.
//!
//! The peer's address may appear, disappear or move at any time. This crate
//! finds it, holds at most one websocket to it, and turns the push messages it
//! sends into [`ModelEvent`]s on an [`EventBus`](veado_core::EventBus).
//!
//! # Architecture
//!
//! - **Codec**: `"nodes:<json>"` frames to and from typed requests/responses.
//! - **Discovery**: watches a directory of peer descriptor files and emits
//!   appeared / changed / disappeared diffs.
//! - **Connection**: one websocket per peer with an unconditional reconnect
//!   loop and a non-blocking send.
//! - **Controller**: the single owner of the active connection slot; arbitrates
//!   between discovery proposals and configuration changes.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use veado_core::ConnectionConfig;
//! use veado_network::{Controller, ControllerSettings};
//!
//! # async fn example() {
//! let controller = Controller::new(ControllerSettings::default());
//! let _sub = controller.events().subscribe(|event| println!("{event:?}"));
//! controller.apply_config(ConnectionConfig::direct("localhost", 40404)).await;
//! // ... events flow while the peer is reachable ...
//! controller.shutdown().await;
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod events;
pub mod peer;
pub mod watcher;

// ── Re-exports for convenience ──────────────────────────────────────────

pub use codec::{DecodeError, Request, Response};
pub use connection::{ConnectionSettings, PeerConnection, PeerLink};
pub use controller::{Controller, ControllerSettings};
pub use discovery::{DiscoveryService, DiscoverySettings, DiscoveryStrategy, PeerArbiter, PeerDiff};
pub use error::NetworkError;
pub use events::{ModelEvent, RequestSink, StateSummary};
pub use peer::PeerInstance;
