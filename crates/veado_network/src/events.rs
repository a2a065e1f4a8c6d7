//! Events published by the controller and the seam the model sends through.

use serde::{Deserialize, Serialize};

use crate::codec::Request;

/// One entry of a full state list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "thumbHash")]
    pub thumb_hash: String,
}

/// A one-shot notification about the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ModelEvent {
    /// The complete set of states the peer exposes.
    AllStates(Vec<StateSummary>),
    /// The state that is now active.
    ActiveState(String),
    /// A state's thumbnail, as raw PNG bytes.
    Thumbnail {
        state_id: String,
        hash: String,
        png: Vec<u8>,
    },
    /// Connectivity to the peer changed.
    Connected(bool),
}

/// Anything that can forward a request to the peer.
///
/// Sends are fire-and-forget: `false` means nothing was sent because no live
/// socket exists.
pub trait RequestSink: Send + Sync {
    fn send_request(&self, request: Request) -> bool;

    /// Whether a socket is open right now.
    fn is_connected(&self) -> bool;
}
