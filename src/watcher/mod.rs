//! Directory observation.
//!
//! Watches each session's working directory recursively, collapses event
//! bursts with a debounce timer, and reports file-count changes through a
//! caller-supplied callback. Also provides the on-demand snapshots
//! (tree, `.claude` config) in [`snapshot`].

mod snapshot;

pub use snapshot::{build_file_tree, count_files, read_claude_config, ConfigFile, FileNode};

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Directories excluded from counting, watching, and tree snapshots.
const EXCLUDED_DIRS: [&str; 3] = ["node_modules", ".git", "vendor"];

pub(crate) fn is_excluded_dir(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

pub(crate) fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Invoked with `(session_id, file_count, drink_count)` whenever a
/// session's file count changes.
pub type UpdateCallback = Arc<dyn Fn(&str, u64, u64) + Send + Sync>;

struct WatchEntry {
    cancel: CancellationToken,
}

/// Tracks filesystem mutations under each session's working directory.
///
/// The watcher never references its consumer directly; all reporting goes
/// through the injected [`UpdateCallback`].
pub struct DirectoryWatcher {
    entries: DashMap<String, WatchEntry>,
    drink_ratio: u64,
    debounce: Duration,
    callback: UpdateCallback,
}

impl DirectoryWatcher {
    pub fn new(drink_ratio: u64, debounce: Duration, callback: UpdateCallback) -> Self {
        Self {
            entries: DashMap::new(),
            drink_ratio: drink_ratio.max(1),
            debounce,
            callback,
        }
    }

    /// Start watching `work_dir` for a session. The initial file count is
    /// reported as soon as the watch task starts.
    pub fn watch(&self, session_id: &str, work_dir: &str) -> notify::Result<()> {
        let (tx, rx) = mpsc::channel(128);
        let mut fs_watcher = notify::recommended_watcher(move |res| {
            // notify delivers on its own thread; a closed channel just
            // means the watch task is gone.
            let _ = tx.blocking_send(res);
        })?;
        fs_watcher.watch(Path::new(work_dir), RecursiveMode::Recursive)?;

        let cancel = CancellationToken::new();
        self.entries.insert(
            session_id.to_string(),
            WatchEntry {
                cancel: cancel.clone(),
            },
        );

        tokio::spawn(watch_loop(
            fs_watcher,
            rx,
            PathBuf::from(work_dir),
            session_id.to_string(),
            cancel,
            self.drink_ratio,
            self.debounce,
            self.callback.clone(),
        ));

        debug!(session = session_id, dir = work_dir, "watching directory");
        Ok(())
    }

    /// Stop watching a session's directory. Idempotent.
    pub fn unwatch(&self, session_id: &str) {
        if let Some((_, entry)) = self.entries.remove(session_id) {
            entry.cancel.cancel();
            debug!(session = session_id, "stopped watching");
        }
    }

    /// Stop all watch tasks.
    pub fn shutdown(&self) {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.unwatch(&id);
        }
    }
}

/// True when `path` sits below an excluded or hidden (non-`.claude`)
/// directory relative to `root`. The final path component is not checked:
/// events for an entry arrive from its parent directory.
fn under_excluded_dir(root: &Path, path: &Path) -> bool {
    let Ok(rel) = path.strip_prefix(root) else {
        return true;
    };
    let components: Vec<Component> = rel.components().collect();
    let parents = components.len().saturating_sub(1);
    components.iter().take(parents).any(|component| {
        let name = component.as_os_str().to_string_lossy();
        is_excluded_dir(&name) || (is_hidden(&name) && name != ".claude")
    })
}

#[allow(clippy::too_many_arguments)]
async fn watch_loop(
    _fs_watcher: RecommendedWatcher,
    mut rx: mpsc::Receiver<notify::Result<notify::Event>>,
    root: PathBuf,
    session_id: String,
    cancel: CancellationToken,
    drink_ratio: u64,
    debounce: Duration,
    callback: UpdateCallback,
) {
    let mut last_count: i64 = -1;
    recount(&root, &session_id, drink_ratio, &mut last_count, &callback).await;

    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            incoming = rx.recv() => {
                match incoming {
                    None => break,
                    Some(Ok(event)) => {
                        // Every event under a watched (non-excluded) path
                        // restarts the single shared debounce timer.
                        if event
                            .paths
                            .iter()
                            .any(|path| !under_excluded_dir(&root, path))
                        {
                            deadline = Some(Instant::now() + debounce);
                        }
                    }
                    Some(Err(err)) => {
                        warn!(session = %session_id, error = %err, "watcher error");
                    }
                }
            }

            // The branch expression is evaluated even when the guard is
            // false, so the fallback instant must not panic.
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                recount(&root, &session_id, drink_ratio, &mut last_count, &callback).await;
            }
        }
    }
    // Dropping the notify handle here closes the native watcher.
}

async fn recount(
    root: &Path,
    session_id: &str,
    drink_ratio: u64,
    last_count: &mut i64,
    callback: &UpdateCallback,
) {
    let dir = root.to_path_buf();
    let count = match tokio::task::spawn_blocking(move || count_files(&dir)).await {
        Ok(count) => count,
        Err(err) => {
            warn!(session = session_id, error = %err, "file count task failed");
            return;
        }
    };

    if count as i64 != *last_count {
        *last_count = count as i64;
        callback(session_id, count, count / drink_ratio);
    }
}
