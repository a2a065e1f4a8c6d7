//! The single owner of the active connection slot.
//!
//! Discovery diffs, configuration changes and explicit user actions all go
//! through the [`Controller`], which applies them one at a time under an async
//! mutex. Sends do not take that mutex: they read a separate route to the
//! live link so they never wait behind a slow terminate.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use veado_core::{ConnectionConfig, EventBus};

use crate::codec::Request;
use crate::connection::{ConnectionSettings, PeerConnection, PeerLink};
use crate::discovery::{DiscoveryService, DiscoverySettings, PeerArbiter};
use crate::events::{ModelEvent, RequestSink};
use crate::peer::PeerInstance;

/// Tunables handed down to the connection and discovery workers.
#[derive(Debug, Clone, Default)]
pub struct ControllerSettings {
    pub connection: ConnectionSettings,
    pub discovery: DiscoverySettings,
}

struct Slot {
    config: Option<ConnectionConfig>,
    active: Option<PeerConnection>,
    discovery: DiscoveryService,
    /// Bumped every time discovery is stopped, so diffs from an old watcher
    /// can be recognized and dropped.
    generation: u64,
}

struct Route {
    peer: PeerInstance,
    link: PeerLink,
}

pub struct Controller {
    settings: ControllerSettings,
    events: EventBus<ModelEvent>,
    slot: Mutex<Slot>,
    route: RwLock<Option<Route>>,
    this: Weak<Controller>,
}

impl Controller {
    pub fn new(settings: ControllerSettings) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            slot: Mutex::new(Slot {
                config: None,
                active: None,
                discovery: DiscoveryService::new(settings.discovery.clone()),
                generation: 0,
            }),
            settings,
            events: EventBus::new("controller"),
            route: RwLock::new(None),
            this: this.clone(),
        })
    }

    /// Bus carrying every event decoded from the active peer.
    pub fn events(&self) -> &EventBus<ModelEvent> {
        &self.events
    }

    /// Whether the active connection currently has a live socket.
    pub fn is_connected(&self) -> bool {
        self.route
            .read()
            .as_ref()
            .is_some_and(|route| route.link.is_open())
    }

    /// The peer the active connection targets, connected or not.
    pub fn active_peer(&self) -> Option<PeerInstance> {
        self.route.read().as_ref().map(|route| route.peer.clone())
    }

    /// The last configuration applied.
    pub async fn config(&self) -> Option<ConnectionConfig> {
        self.slot.lock().await.config.clone()
    }

    /// Connect to `peer` unless a connection is already active.
    pub async fn propose(&self, peer: PeerInstance) {
        let mut slot = self.slot.lock().await;
        self.propose_locked(&mut slot, peer);
    }

    /// Tear down the active connection.
    ///
    /// With `peer` given and `force` unset, nothing happens unless `peer` is
    /// the active target.
    pub async fn terminate(&self, peer: Option<&PeerInstance>, force: bool) {
        let mut slot = self.slot.lock().await;
        self.terminate_locked(&mut slot, peer, force).await;
    }

    /// Switch to a new configuration. A configuration equal to the current
    /// one is ignored.
    pub async fn apply_config(&self, config: ConnectionConfig) {
        let mut slot = self.slot.lock().await;
        if slot.config.as_ref() == Some(&config) {
            debug!("Configuration unchanged");
            return;
        }
        info!("Applying configuration: {config:?}");

        self.stop_discovery_locked(&mut slot).await;
        self.terminate_locked(&mut slot, None, true).await;
        slot.config = Some(config.clone());

        if config.discovery_mode {
            let watch_dir = config.normalized().watch_dir;
            let arbiter = Arc::new(DiscoveryArbiter {
                controller: self.this.clone(),
                generation: slot.generation,
            });
            if let Err(e) = slot.discovery.start(&watch_dir, arbiter).await {
                warn!("Discovery not started: {e}");
            }
        } else {
            self.propose_locked(&mut slot, PeerInstance::manual(config.hostname, config.port));
        }
    }

    /// Queue a request on the live socket. See [`PeerLink::send`].
    pub fn send(&self, request: &Request) -> bool {
        match self.route.read().as_ref() {
            Some(route) => route.link.send(request),
            None => {
                debug!("No active connection for {request:?}");
                false
            }
        }
    }

    /// Stop discovery and the active connection. A later `apply_config`
    /// starts from scratch, even with the same configuration.
    pub async fn shutdown(&self) {
        let mut slot = self.slot.lock().await;
        self.stop_discovery_locked(&mut slot).await;
        self.terminate_locked(&mut slot, None, true).await;
        slot.config = None;
        info!("Controller shut down");
    }

    fn propose_locked(&self, slot: &mut Slot, peer: PeerInstance) {
        if let Some(active) = &slot.active {
            warn!(
                "Connection to {} still active, ignoring proposal of {peer}",
                active.peer()
            );
            return;
        }

        info!("Connecting to {peer}");
        // Route first: the worker's Connected(true) handlers send through it.
        let link = PeerLink::default();
        *self.route.write() = Some(Route {
            peer: peer.clone(),
            link: link.clone(),
        });
        let connection =
            PeerConnection::connect(peer, link, self.events.clone(), &self.settings.connection);
        slot.active = Some(connection);
    }

    async fn terminate_locked(&self, slot: &mut Slot, peer: Option<&PeerInstance>, force: bool) {
        let Some(active) = &slot.active else {
            return;
        };
        if let Some(peer) = peer {
            if !force && active.peer() != peer {
                info!(
                    "Ignoring termination of {peer}: active connection is {}",
                    active.peer()
                );
                return;
            }
        }

        self.route.write().take();
        if let Some(mut connection) = slot.active.take() {
            info!("Terminating connection to {}", connection.peer());
            connection.terminate().await;
        }
    }

    async fn stop_discovery_locked(&self, slot: &mut Slot) {
        slot.discovery.stop().await;
        slot.generation += 1;
    }
}

impl RequestSink for Controller {
    fn send_request(&self, request: Request) -> bool {
        self.send(&request)
    }

    fn is_connected(&self) -> bool {
        Controller::is_connected(self)
    }
}

/// Routes one discovery session's diffs into the controller. Diffs from a
/// session that has since been stopped are dropped.
struct DiscoveryArbiter {
    controller: Weak<Controller>,
    generation: u64,
}

#[async_trait]
impl PeerArbiter for DiscoveryArbiter {
    async fn terminate(&self, peer: &PeerInstance) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        let mut slot = controller.slot.lock().await;
        if slot.generation != self.generation {
            debug!("Dropping stale termination of {peer}");
            return;
        }
        controller.terminate_locked(&mut slot, Some(peer), false).await;
    }

    async fn propose(&self, peer: PeerInstance) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        let mut slot = controller.slot.lock().await;
        if slot.generation != self.generation {
            debug!("Dropping stale proposal of {peer}");
            return;
        }
        controller.propose_locked(&mut slot, peer);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
