//! OS-level change notifications for a descriptor directory.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::NetworkError;

/// What happened to a descriptor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorEvent {
    /// Created or rewritten; contents should be re-read.
    Updated(PathBuf),
    /// Gone.
    Removed(PathBuf),
}

/// Watches a directory and invokes a callback for each descriptor event.
///
/// The watcher stays active as long as this struct is alive.
pub struct DirectoryWatcher {
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    pub fn new(
        path: &Path,
        callback: impl Fn(DescriptorEvent) + Send + 'static,
    ) -> Result<Self, NetworkError> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for descriptor_event in translate_event(&event) {
                    callback(descriptor_event);
                }
            }
            Err(e) => {
                warn!("Directory watcher error: {e}");
            }
        })
        .map_err(|e| NetworkError::Discovery(format!("Failed to create watcher: {e}")))?;

        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                NetworkError::Discovery(format!("Failed to watch {}: {e}", path.display()))
            })?;

        debug!("Watching for descriptor changes: {}", path.display());
        Ok(Self { _watcher: watcher })
    }
}

/// Translate a raw `notify::Event` into zero or more `DescriptorEvent`s.
fn translate_event(event: &Event) -> Vec<DescriptorEvent> {
    let paths = &event.paths;

    match &event.kind {
        EventKind::Create(_) => paths
            .iter()
            .map(|p| DescriptorEvent::Updated(p.clone()))
            .collect(),

        EventKind::Modify(modify_kind) => {
            use notify::event::{ModifyKind, RenameMode};
            match modify_kind {
                ModifyKind::Name(RenameMode::Both) if paths.len() >= 2 => vec![
                    DescriptorEvent::Removed(paths[0].clone()),
                    DescriptorEvent::Updated(paths[1].clone()),
                ],
                ModifyKind::Name(RenameMode::From) => paths
                    .iter()
                    .map(|p| DescriptorEvent::Removed(p.clone()))
                    .collect(),
                _ => paths
                    .iter()
                    .map(|p| DescriptorEvent::Updated(p.clone()))
                    .collect(),
            }
        }

        EventKind::Remove(_) => paths
            .iter()
            .map(|p| DescriptorEvent::Removed(p.clone()))
            .collect(),

        _ => Vec::new(),
    }
}
