// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem watcher: turns `.deb` file events under `pkgroot` into distribution-changed
notifications.

Uses `notify`'s recommended (recursive, cross-platform) watcher, whose OS-thread callback only
forwards raw events into an unbounded channel; a dedicated consumer task performs the `.deb`
filter, distribution extraction, and handler dispatch, so a panicking handler never touches the
watcher's OS thread.
*/

use crate::error::{Result, ServerError};
use async_trait::async_trait;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A subscriber notified with the name of a distribution whose package tree changed.
pub type Handler = Arc<dyn Fn(&str) + Send + Sync>;

/// Turns filesystem events under `pkgroot` into "distribution changed" notifications.
#[async_trait]
pub trait PackageWatcher: Send + Sync {
    /// Begin recursive watching of `pkgroot`. Idempotent within a lifecycle.
    async fn start(&self) -> Result<()>;

    /// Stop watching; in-flight dispatches may still complete.
    fn stop(&self);

    /// Register a handler invoked with a distribution name for every relevant event.
    fn register(&self, handler: Handler);
}

/// Production [PackageWatcher], backed by `notify`'s recommended watcher.
pub struct FsPackageWatcher {
    pkgroot: PathBuf,
    handlers: Arc<std::sync::Mutex<Vec<Handler>>>,
    watcher: std::sync::Mutex<Option<RecommendedWatcher>>,
    stopped: std::sync::atomic::AtomicBool,
}

impl FsPackageWatcher {
    pub fn new(pkgroot: PathBuf) -> Self {
        Self {
            pkgroot,
            handlers: Arc::new(std::sync::Mutex::new(Vec::new())),
            watcher: std::sync::Mutex::new(None),
            stopped: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl PackageWatcher for FsPackageWatcher {
    async fn start(&self) -> Result<()> {
        if !self.pkgroot.is_dir() {
            return Err(ServerError::Configuration(format!(
                "pkgroot {:?} does not exist or is not a directory",
                self.pkgroot
            )));
        }

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        )?;
        watcher.watch(&self.pkgroot, RecursiveMode::Recursive)?;
        *self.watcher.lock().expect("watcher mutex poisoned") = Some(watcher);

        let pkgroot = self.pkgroot.clone();
        let handlers = self.handlers.clone();
        tokio::spawn(async move {
            while let Some(event) = raw_rx.recv().await {
                match event {
                    Ok(event) => {
                        let handlers = handlers.lock().expect("handlers mutex poisoned").clone();
                        dispatch_event(&event, &pkgroot, &handlers);
                    }
                    Err(e) => warn!(error = %e, "filesystem watcher internal error"),
                }
            }
            debug!("package watcher channel closed");
        });

        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, std::sync::atomic::Ordering::SeqCst);
        *self.watcher.lock().expect("watcher mutex poisoned") = None;
    }

    fn register(&self, handler: Handler) {
        self.handlers.lock().expect("handlers mutex poisoned").push(handler);
    }
}

fn dispatch_event(event: &Event, pkgroot: &Path, handlers: &[Handler]) {
    // Create, move/rename, and delete only — a plain content/metadata `Modify` (e.g. an mtime
    // or permission change with no rename) is not a package addition or removal.
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_)) | EventKind::Remove(_)
    ) {
        return;
    }

    for path in &event.paths {
        let Some(distribution) = relevant_distribution(path, pkgroot) else {
            continue;
        };
        for handler in handlers {
            handler(&distribution);
        }
    }
}

/// Returns the distribution name for `path` if it is a relevant event: a `.deb` file under
/// `pkgroot` whose path has at least one segment beyond `pkgroot`.
fn relevant_distribution(path: &Path, pkgroot: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("deb") {
        return None;
    }
    let relative = path.strip_prefix(pkgroot).ok()?;
    let first = relative.components().next()?;
    let distribution = first.as_os_str().to_str()?.to_string();
    if distribution.is_empty() {
        debug!(path = %path.display(), "relevant .deb event has no distribution segment");
        return None;
    }
    Some(distribution)
}
