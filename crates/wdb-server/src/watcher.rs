//! libpython access watcher.
//!
//! Python interpreters map a libpython shared object when they start, so
//! open/close events on those files are a cheap signal that the set of
//! debuggable processes changed. When no libpython can be found there is
//! nothing to watch and control clients are told to poll instead.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use log::{debug, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

pub struct LibraryWatcher {
    // Dropping the watcher stops the watch; hold it for the server's
    // lifetime.
    _watcher: RecommendedWatcher,
    pub files: Vec<PathBuf>,
}

impl LibraryWatcher {
    /// Locate libpython shared objects worth watching. An empty result means
    /// the platform offers nothing to watch.
    pub fn discover(extra_search_path: Option<&Path>) -> Vec<PathBuf> {
        let mut files = glob_all("/usr/lib/libpython*");
        if files.is_empty() {
            files = glob_all("/lib/libpython*");
        }
        if let Some(root) = extra_search_path {
            let pattern = format!("{}/**/libpython*", root.display());
            files.extend(glob_all(&pattern));
        }
        files
    }

    /// Watch the given files; every access fires one unit on `trigger`.
    /// Bursts coalesce into however many units fit the channel.
    pub fn start(files: Vec<PathBuf>, trigger: mpsc::Sender<()>) -> Result<Self> {
        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<Event>| match event {
                Ok(event) if matches!(event.kind, EventKind::Access(_)) => {
                    let _ = trigger.try_send(());
                }
                Ok(_) => {}
                Err(err) => warn!("library watcher error: {err}"),
            })
            .context("creating library watcher")?;

        for file in &files {
            watcher
                .watch(file, RecursiveMode::NonRecursive)
                .with_context(|| format!("watching {}", file.display()))?;
        }
        debug!("watching for {files:?}");

        Ok(Self {
            _watcher: watcher,
            files,
        })
    }
}

fn glob_all(pattern: &str) -> Vec<PathBuf> {
    match glob(pattern) {
        Ok(paths) => paths.flatten().collect(),
        Err(err) => {
            warn!("bad library glob {pattern}: {err}");
            Vec::new()
        }
    }
}
