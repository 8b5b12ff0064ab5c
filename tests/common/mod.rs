//! Shared test app constructor.

use std::sync::Arc;

use axum::Router;
use tempfile::TempDir;

use barkeep::api::{create_router, AppState};
use barkeep::config::AppConfig;
use barkeep::session::SessionManager;
use barkeep::watcher::DirectoryWatcher;
use barkeep::ws::Hub;

pub struct TestApp {
    pub router: Router,
    /// Valid working directory for created sessions; dropped with the app.
    pub work_dir: TempDir,
}

/// Build an app backed by `cat` sessions and a temp working directory.
pub fn test_app() -> TestApp {
    let mut config = AppConfig::default();
    config.sessions.command = "cat".to_string();
    config.sessions.args = Vec::new();
    config.sessions.max_sessions = 4;
    config.sessions.graceful_timeout_secs = 1;
    config.watcher.debounce_ms = 100;

    let manager = Arc::new(SessionManager::new(config.sessions.manager_config()));
    let hub = Arc::new(Hub::new(manager.clone(), config.realtime.outbound_queue));
    let watcher = {
        let hub = hub.clone();
        Arc::new(DirectoryWatcher::new(
            config.watcher.drink_ratio,
            config.watcher.debounce(),
            Arc::new(move |session_id: &str, file_count, drink_count| {
                hub.on_file_update(session_id, file_count, drink_count);
            }),
        ))
    };

    let state = AppState {
        manager,
        hub,
        watcher,
        config: Arc::new(config),
    };

    TestApp {
        router: create_router(state),
        work_dir: tempfile::tempdir().unwrap(),
    }
}
