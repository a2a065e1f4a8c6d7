//! Peer discovery from a directory of descriptor files.
//!
//! A running peer keeps a small JSON descriptor in a well-known `instances`
//! directory. [`DiscoveryService`] observes that directory, either by polling
//! it or by subscribing to OS change notifications, and turns what it sees
//! into [`PeerDiff`]s. A single worker task owns the known-peer map, so diff
//! production is serialized no matter how events arrive. A consumer task then
//! applies each diff to a [`PeerArbiter`], always terminating the outgoing
//! peer before proposing the incoming one.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use veado_core::config::INSTANCES_DIR_NAME;

use crate::error::NetworkError;
use crate::peer::PeerInstance;
use crate::watcher::{DescriptorEvent, DirectoryWatcher};

/// Default interval between directory polls.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2500);

/// How the directory is observed. Both produce the same diffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryStrategy {
    /// Rescan the whole directory every poll interval.
    #[default]
    Poll,
    /// Subscribe to filesystem notifications, after one initial scan.
    Watch,
}

/// Tunables for the discovery service.
#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub strategy: DiscoveryStrategy,
    pub poll_interval: Duration,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            strategy: DiscoveryStrategy::default(),
            poll_interval: POLL_INTERVAL,
        }
    }
}

/// A structural change in the set of advertised peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerDiff {
    Appeared(PeerInstance),
    Changed { old: PeerInstance, new: PeerInstance },
    Disappeared(PeerInstance),
}

impl PeerDiff {
    /// The peer that should be torn down, if any.
    pub fn outgoing(&self) -> Option<&PeerInstance> {
        match self {
            Self::Appeared(_) => None,
            Self::Changed { old, .. } | Self::Disappeared(old) => Some(old),
        }
    }

    /// The peer that should be connected, if any.
    pub fn incoming(&self) -> Option<&PeerInstance> {
        match self {
            Self::Appeared(new) | Self::Changed { new, .. } => Some(new),
            Self::Disappeared(_) => None,
        }
    }
}

/// Receives connect/disconnect decisions derived from discovery.
#[async_trait]
pub trait PeerArbiter: Send + Sync {
    async fn terminate(&self, peer: &PeerInstance);
    async fn propose(&self, peer: PeerInstance);
}

/// Apply one diff: terminate first, then propose.
pub async fn apply_diff(arbiter: &dyn PeerArbiter, diff: &PeerDiff) {
    if let Some(old) = diff.outgoing() {
        arbiter.terminate(old).await;
    }
    if let Some(new) = diff.incoming() {
        arbiter.propose(new.clone()).await;
    }
}

// ---------------------------------------------------------------------------
// Known peers
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct KnownPeer {
    path: PathBuf,
    instance: PeerInstance,
}

/// Last-known descriptor contents, keyed by peer id.
#[derive(Debug, Default)]
struct KnownPeers {
    peers: HashMap<String, KnownPeer>,
}

impl KnownPeers {
    /// Record a freshly parsed descriptor. Identical content yields no diff.
    ///
    /// A descriptor rewritten in place with a different id replaces the entry
    /// previously recorded for that path.
    fn observe(&mut self, path: &Path, instance: PeerInstance) -> Option<PeerDiff> {
        let displaced = self
            .peers
            .iter()
            .find(|(id, known)| known.path == path && **id != instance.peer_id)
            .map(|(id, _)| id.clone());
        if let Some(known) = displaced.and_then(|id| self.peers.remove(&id)) {
            self.peers.insert(
                instance.peer_id.clone(),
                KnownPeer {
                    path: path.to_path_buf(),
                    instance: instance.clone(),
                },
            );
            return Some(PeerDiff::Changed {
                old: known.instance,
                new: instance,
            });
        }

        match self.peers.get_mut(&instance.peer_id) {
            Some(known) if known.instance == instance => {
                known.path = path.to_path_buf();
                None
            }
            Some(known) => {
                known.path = path.to_path_buf();
                let old = std::mem::replace(&mut known.instance, instance.clone());
                Some(PeerDiff::Changed { old, new: instance })
            }
            None => {
                self.peers.insert(
                    instance.peer_id.clone(),
                    KnownPeer {
                        path: path.to_path_buf(),
                        instance: instance.clone(),
                    },
                );
                Some(PeerDiff::Appeared(instance))
            }
        }
    }

    /// Handle a deleted descriptor. The file name is taken as the peer id;
    /// failing that, the recorded path is matched.
    fn forget_path(&mut self, path: &Path) -> Option<PeerDiff> {
        let by_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|id| self.peers.contains_key(*id))
            .map(str::to_owned);
        let id = by_name.or_else(|| {
            self.peers
                .iter()
                .find(|(_, known)| known.path == path)
                .map(|(id, _)| id.clone())
        });

        match id.and_then(|id| self.peers.remove(&id)) {
            Some(known) => Some(PeerDiff::Disappeared(known.instance)),
            None => {
                debug!("Descriptor {} removed but was never known", path.display());
                None
            }
        }
    }

    /// Drop every peer whose descriptor path is no longer present.
    fn retain_present(&mut self, present: &HashSet<PathBuf>) -> Vec<PeerDiff> {
        let gone: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, known)| !present.contains(&known.path))
            .map(|(id, _)| id.clone())
            .collect();

        gone.into_iter()
            .filter_map(|id| self.peers.remove(&id))
            .map(|known| PeerDiff::Disappeared(known.instance))
            .collect()
    }

    fn len(&self) -> usize {
        self.peers.len()
    }
}

/// Diff the directory's current contents against `known`.
///
/// A descriptor that exists but does not parse keeps its previous entry; the
/// peer may be halfway through rewriting it.
fn scan(dir: &Path, known: &mut KnownPeers) -> Vec<PeerDiff> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Couldn't read {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut present = HashSet::new();
    let mut diffs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        present.insert(path.clone());
        match PeerInstance::from_path(&path) {
            Ok(instance) => diffs.extend(known.observe(&path, instance)),
            Err(e) => trace!("Skipping descriptor {}: {e}", path.display()),
        }
    }
    diffs.extend(known.retain_present(&present));
    diffs
}

// ---------------------------------------------------------------------------
// DiscoveryService
// ---------------------------------------------------------------------------

struct Session {
    watch_dir: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    worker: JoinHandle<()>,
}

/// Observes one instances directory at a time.
pub struct DiscoveryService {
    settings: DiscoverySettings,
    session: Option<Session>,
}

impl DiscoveryService {
    pub fn new(settings: DiscoverySettings) -> Self {
        Self {
            settings,
            session: None,
        }
    }

    /// Whether a watcher is currently running.
    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }

    /// The directory being observed, if running.
    pub fn watch_dir(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.watch_dir.as_path())
    }

    /// Begin observing `watch_dir`, replacing any previous session.
    ///
    /// Refuses (with a warning) a path that does not end in the instances
    /// directory name; nothing is left running in that case.
    pub async fn start(
        &mut self,
        watch_dir: &Path,
        arbiter: Arc<dyn PeerArbiter>,
    ) -> Result<(), NetworkError> {
        self.stop().await;

        if !watch_dir.ends_with(INSTANCES_DIR_NAME) {
            warn!(
                "Discovery configured with path {} that does not end with `{INSTANCES_DIR_NAME}`. Ignoring.",
                watch_dir.display()
            );
            return Err(NetworkError::InvalidWatchDir(watch_dir.to_path_buf()));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (diff_tx, diff_rx) = mpsc::unbounded_channel();
        let dir = watch_dir.to_path_buf();

        let worker = match self.settings.strategy {
            DiscoveryStrategy::Poll => {
                let interval = self.settings.poll_interval;
                tokio::spawn(run_poller(dir.clone(), interval, diff_tx, shutdown_rx.clone()))
            }
            DiscoveryStrategy::Watch => {
                let (fs_tx, fs_rx) = mpsc::unbounded_channel();
                let watcher = DirectoryWatcher::new(&dir, move |event| {
                    let _ = fs_tx.send(event);
                })?;
                tokio::spawn(run_watcher(
                    dir.clone(),
                    watcher,
                    fs_rx,
                    diff_tx,
                    shutdown_rx.clone(),
                ))
            }
        };
        tokio::spawn(consume(diff_rx, arbiter, shutdown_rx));

        info!(
            "Discovery started on {} ({:?})",
            dir.display(),
            self.settings.strategy
        );
        self.session = Some(Session {
            watch_dir: dir,
            shutdown_tx,
            worker,
        });
        Ok(())
    }

    /// Stop observing and forget every known descriptor. Idempotent.
    ///
    /// Waits for the worker to exit. Diffs still queued for the consumer are
    /// discarded rather than applied.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.shutdown_tx.send_replace(true);
        if let Err(e) = session.worker.await {
            warn!("Discovery worker ended abnormally: {e}");
        }
        info!("Discovery stopped on {}", session.watch_dir.display());
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        if let Some(session) = &self.session {
            session.shutdown_tx.send_replace(true);
        }
    }
}

async fn run_poller(
    dir: PathBuf,
    interval: Duration,
    diff_tx: mpsc::UnboundedSender<PeerDiff>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Poller started, monitoring {}", dir.display());
    let mut known = KnownPeers::default();

    loop {
        for diff in scan(&dir, &mut known) {
            debug!("Discovery diff: {diff:?}");
            if diff_tx.send(diff).is_err() {
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!("Poller terminating with {} known peers", known.len());
}

async fn run_watcher(
    dir: PathBuf,
    watcher: DirectoryWatcher,
    mut fs_rx: mpsc::UnboundedReceiver<DescriptorEvent>,
    diff_tx: mpsc::UnboundedSender<PeerDiff>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Watcher started, monitoring {}", dir.display());
    let mut known = KnownPeers::default();

    for diff in scan(&dir, &mut known) {
        if diff_tx.send(diff).is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            Some(event) = fs_rx.recv() => {
                let diff = match event {
                    DescriptorEvent::Updated(path) => match PeerInstance::from_path(&path) {
                        Ok(instance) => known.observe(&path, instance),
                        Err(e) => {
                            trace!("Skipping descriptor {}: {e}", path.display());
                            None
                        }
                    },
                    DescriptorEvent::Removed(path) => known.forget_path(&path),
                };
                if let Some(diff) = diff {
                    debug!("Discovery diff: {diff:?}");
                    if diff_tx.send(diff).is_err() {
                        break;
                    }
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    drop(watcher);
    debug!("Watcher terminating with {} known peers", known.len());
}

async fn consume(
    mut diff_rx: mpsc::UnboundedReceiver<PeerDiff>,
    arbiter: Arc<dyn PeerArbiter>,
    shutdown: watch::Receiver<bool>,
) {
    while let Some(diff) = diff_rx.recv().await {
        if *shutdown.borrow() {
            debug!("Discarding diff from stopped discovery: {diff:?}");
            continue;
        }
        apply_diff(arbiter.as_ref(), &diff).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
