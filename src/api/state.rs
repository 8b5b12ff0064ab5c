//! Application state shared across handlers.

use std::sync::Arc;

use tracing::warn;

use crate::config::AppConfig;
use crate::session::{Session, SessionManager};
use crate::watcher::DirectoryWatcher;
use crate::ws::Hub;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Session manager owning subprocess lifecycles.
    pub manager: Arc<SessionManager>,
    /// Realtime hub owning client connections.
    pub hub: Arc<Hub>,
    /// Directory watcher for per-session filesystem activity.
    pub watcher: Arc<DirectoryWatcher>,
    /// Effective configuration.
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Post-creation side effects shared by the REST and realtime create
    /// paths: start file watching, announce the session, and attach every
    /// connected client to its output.
    pub async fn announce_session(&self, session: &Session) {
        if let Err(err) = self.watcher.watch(&session.id, &session.work_dir) {
            warn!(session = %session.id, error = %err, "failed to start file watcher");
        }
        self.hub.broadcast_session_update(session);
        self.hub.subscribe_all_clients(&session.id).await;
    }
}
