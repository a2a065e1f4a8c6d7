//! Peer instances and their descriptor files.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::codec::CLIENT_TOKEN;
use crate::error::NetworkError;

/// One reachable peer. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerInstance {
    /// Stable id from the descriptor file; empty for a manually configured
    /// peer.
    pub peer_id: String,
    pub hostname: String,
    pub port: u16,
}

/// On-disk shape of a descriptor file.
#[derive(Deserialize)]
struct Descriptor {
    id: String,
    server: String,
}

impl PeerInstance {
    /// A peer configured by hand rather than discovered.
    pub fn manual(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            peer_id: String::new(),
            hostname: hostname.into(),
            port,
        }
    }

    /// Whether this peer came from direct configuration.
    pub fn is_manual(&self) -> bool {
        self.peer_id.is_empty()
    }

    /// Parse descriptor JSON: `{"id": "...", "server": "host:port"}`.
    pub fn from_descriptor(contents: &str) -> Result<Self, NetworkError> {
        let descriptor: Descriptor = serde_json::from_str(contents)?;
        let (hostname, port) = descriptor
            .server
            .rsplit_once(':')
            .ok_or_else(|| NetworkError::Descriptor(format!("no port in {:?}", descriptor.server)))?;
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| NetworkError::Descriptor(format!("bad port {port:?}: {e}")))?;
        if hostname.is_empty() {
            return Err(NetworkError::Descriptor("empty hostname".to_string()));
        }
        Ok(Self {
            peer_id: descriptor.id,
            hostname: hostname.to_string(),
            port,
        })
    }

    /// Read and parse a descriptor file.
    pub fn from_path(path: &Path) -> Result<Self, NetworkError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_descriptor(&contents)
    }

    /// Websocket URL for this peer, with the client-identifying query.
    pub fn url(&self) -> String {
        format!("ws://{}:{}/?n={CLIENT_TOKEN}", self.hostname, self.port)
    }
}

impl fmt::Display for PeerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_manual() {
            write!(f, "{}:{} (manual)", self.hostname, self.port)
        } else {
            write!(f, "{}@{}:{}", self.peer_id, self.hostname, self.port)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
