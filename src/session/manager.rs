//! Session lifecycle management.
//!
//! The manager owns the `session id → managed session` map, enforces the
//! concurrent-session ceiling, scans subprocess output into events, fans
//! events out to subscribers, and reaps exited subprocesses.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::{OutputEvent, OutputKind, Session, SessionState};
use super::ring_buffer::RingBuffer;

/// Read buffer for the per-stream line scanners.
const SCANNER_BUF_SIZE: usize = 1024 * 1024;

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("working directory does not exist or is not a directory: {0}")]
    BadWorkDir(String),

    #[error("maximum session limit reached ({0})")]
    Saturated(usize),

    #[error("{0} CLI not found in PATH")]
    BinaryMissing(String),

    #[error("failed to start {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session terminated: {0}")]
    SessionTerminated(String),

    #[error("stdin pipe closed")]
    PipeClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Stable wire error code for the realtime protocol.
    pub fn wire_code(&self) -> &'static str {
        match self {
            SessionError::Saturated(_) => "MAX_SESSIONS",
            SessionError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            SessionError::SessionTerminated(_) | SessionError::PipeClosed => "SESSION_TERMINATED",
            SessionError::BadWorkDir(_)
            | SessionError::BinaryMissing(_)
            | SessionError::SpawnFailed { .. }
            | SessionError::Io(_) => "SPAWN_FAILED",
        }
    }
}

/// Manager tuning knobs. Defaults match the served configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// CLI binary launched for every session.
    pub command: String,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Ceiling on concurrently non-terminated sessions.
    pub max_sessions: usize,
    /// Delay between the polite interrupt and the forced kill.
    pub graceful_timeout: Duration,
    /// Output history capacity per session.
    pub ring_capacity: usize,
    /// Bounded queue capacity per subscriber.
    pub subscriber_queue: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["--dangerously-skip-permissions".to_string()],
            max_sessions: 10,
            graceful_timeout: Duration::from_secs(5),
            ring_capacity: 1000,
            subscriber_queue: 100,
        }
    }
}

/// A live subscription to one session's output.
#[derive(Debug)]
pub struct Subscription {
    /// Opaque id used to revoke the subscription.
    pub id: String,
    /// Events recorded before this subscription was registered.
    pub history: Vec<OutputEvent>,
    /// Bounded queue of events produced after registration.
    pub events: mpsc::Receiver<OutputEvent>,
}

/// Serialized, idempotently-closable write end of the child's stdin.
struct StdinWriter {
    inner: Mutex<Option<ChildStdin>>,
}

impl StdinWriter {
    fn new(stdin: ChildStdin) -> Self {
        Self {
            inner: Mutex::new(Some(stdin)),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::PipeClosed)?;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.shutdown().await;
        }
    }
}

/// A session plus everything the manager needs to drive it.
struct ManagedSession {
    id: String,
    info: std::sync::RwLock<Session>,
    pid: Option<u32>,
    cancel: CancellationToken,
    stdin: StdinWriter,
    ring: RingBuffer,
    subscribers: DashMap<String, mpsc::Sender<OutputEvent>>,
}

impl ManagedSession {
    fn snapshot(&self) -> Session {
        self.info.read().unwrap().clone()
    }

    fn state(&self) -> SessionState {
        self.info.read().unwrap().state
    }

    fn set_state(&self, state: SessionState) {
        self.info.write().unwrap().state = state;
    }

    /// Record an event in the history and fan it out to all subscribers.
    /// A subscriber whose queue is full misses this event; it is never
    /// reported as an error.
    fn publish(&self, event: OutputEvent) {
        self.ring.write(event.clone());
        for subscriber in self.subscribers.iter() {
            let _ = subscriber.value().try_send(event.clone());
        }
    }
}

/// Supervises the bounded pool of CLI subprocess sessions.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<ManagedSession>>>,
    config: ManagerConfig,
}

impl SessionManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Spawn a new CLI subprocess in `work_dir` and begin supervising it.
    pub async fn create(&self, work_dir: &str, label: &str) -> Result<Session, SessionError> {
        let meta = std::fs::metadata(work_dir)
            .map_err(|_| SessionError::BadWorkDir(work_dir.to_string()))?;
        if !meta.is_dir() {
            return Err(SessionError::BadWorkDir(work_dir.to_string()));
        }

        let binary = which::which(&self.config.command)
            .map_err(|_| SessionError::BinaryMissing(self.config.command.clone()))?;

        // The saturation check, spawn, and registration all happen under
        // the exclusive lock so the ceiling cannot be raced past.
        let mut sessions = self.sessions.write().await;
        let active = sessions
            .values()
            .filter(|ms| ms.state() != SessionState::Terminated)
            .count();
        if active >= self.config.max_sessions {
            return Err(SessionError::Saturated(self.config.max_sessions));
        }

        let id = Uuid::new_v4().to_string();
        let session = Session {
            id: id.clone(),
            state: SessionState::Creating,
            work_dir: work_dir.to_string(),
            created_at: Utc::now(),
            label: label.to_string(),
        };

        let mut child = Command::new(&binary)
            .args(&self.config.args)
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::SpawnFailed {
                command: self.config.command.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("stdin pipe missing"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout pipe missing"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr pipe missing"))?;

        let ms = Arc::new(ManagedSession {
            id: id.clone(),
            info: std::sync::RwLock::new(session),
            pid: child.id(),
            cancel: CancellationToken::new(),
            stdin: StdinWriter::new(stdin),
            ring: RingBuffer::new(self.config.ring_capacity),
            subscribers: DashMap::new(),
        });
        sessions.insert(id, ms.clone());
        drop(sessions);

        ms.set_state(SessionState::Active);
        debug!(session = %ms.id, command = %self.config.command, "session started");

        tokio::spawn(scan_output(ms.clone(), stdout, OutputKind::Stdout));
        tokio::spawn(scan_output(ms.clone(), stderr, OutputKind::Stderr));
        tokio::spawn(reap(ms.clone(), child));

        Ok(ms.snapshot())
    }

    /// Look up a session by id.
    pub async fn get(&self, id: &str) -> Result<Session, SessionError> {
        Ok(self.managed(id).await?.snapshot())
    }

    /// Snapshot all sessions.
    pub async fn list(&self) -> Vec<Session> {
        let sessions = self.sessions.read().await;
        sessions.values().map(|ms| ms.snapshot()).collect()
    }

    /// Working directory of a session.
    pub async fn work_dir(&self, id: &str) -> Result<String, SessionError> {
        Ok(self.managed(id).await?.snapshot().work_dir)
    }

    /// Append `prompt` plus a newline to the session's stdin.
    pub async fn send_prompt(&self, id: &str, prompt: &str) -> Result<(), SessionError> {
        let ms = self.managed(id).await?;
        if ms.state() == SessionState::Terminated {
            return Err(SessionError::SessionTerminated(id.to_string()));
        }
        let mut data = prompt.as_bytes().to_vec();
        data.push(b'\n');
        ms.stdin.write(&data).await
    }

    /// Request termination: polite interrupt now, forced kill after the
    /// graceful timeout. Returns immediately; termination is observed via
    /// the exit event. Idempotent once the session is terminated.
    pub async fn kill(&self, id: &str) -> Result<(), SessionError> {
        let ms = self.managed(id).await?;
        if ms.state() == SessionState::Terminated {
            return Ok(());
        }

        if let Some(pid) = ms.pid {
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
            if rc != 0 {
                debug!(session = %ms.id, pid, "interrupt delivery failed, process likely gone");
            }
            let cancel = ms.cancel.clone();
            let timeout = self.config.graceful_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            });
        }

        Ok(())
    }

    /// Register a subscriber for a session's output.
    ///
    /// The history snapshot is taken before the queue is registered, so an
    /// event is delivered through the history or the queue, never both.
    pub async fn subscribe(&self, id: &str) -> Result<Subscription, SessionError> {
        let ms = self.managed(id).await?;

        let sub_id = Uuid::new_v4().to_string();
        let history = ms.ring.read_all();
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue);
        ms.subscribers.insert(sub_id.clone(), tx);

        Ok(Subscription {
            id: sub_id,
            history,
            events: rx,
        })
    }

    /// Remove a subscriber and close its queue. Unknown session or
    /// subscription ids are tolerated silently.
    pub async fn unsubscribe(&self, session_id: &str, sub_id: &str) {
        if let Ok(ms) = self.managed(session_id).await {
            ms.subscribers.remove(sub_id);
        }
    }

    /// Gracefully terminate every active session: interrupt all, wait one
    /// graceful timeout, force-cancel stragglers, then close every
    /// subscriber queue so forwarders observe end-of-stream.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|ms| ms.state() != SessionState::Terminated)
                .map(|ms| ms.id.clone())
                .collect()
        };

        for id in &ids {
            let _ = self.kill(id).await;
        }

        tokio::time::sleep(self.config.graceful_timeout).await;

        let sessions = self.sessions.read().await;
        for ms in sessions.values() {
            if ms.state() != SessionState::Terminated {
                ms.cancel.cancel();
            }
            ms.subscribers.clear();
        }
    }

    async fn managed(&self, id: &str) -> Result<Arc<ManagedSession>, SessionError> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(id.to_string()))
    }
}

/// Read newline-delimited text from one subprocess pipe and publish each
/// line. Exits on EOF or read error.
async fn scan_output(
    ms: Arc<ManagedSession>,
    pipe: impl AsyncRead + Unpin,
    kind: OutputKind,
) {
    let mut lines = BufReader::with_capacity(SCANNER_BUF_SIZE, pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                ms.publish(OutputEvent::line(ms.id.clone(), kind, line));
            }
            Ok(None) => break,
            Err(err) => {
                warn!(session = %ms.id, stream = kind.stream_name(), error = %err, "scanner error");
                break;
            }
        }
    }
}

/// Wait for the subprocess to exit (force-killing it if the cancellation
/// token fires first), then close stdin, mark the session terminated, and
/// publish the final exit event.
async fn reap(ms: Arc<ManagedSession>, mut child: Child) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = ms.cancel.cancelled() => {
            if let Err(err) = child.start_kill() {
                debug!(session = %ms.id, error = %err, "force kill failed, process likely exited");
            }
            child.wait().await
        }
    };

    let exit_code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(_) => -1,
    };

    ms.stdin.close().await;
    ms.set_state(SessionState::Terminated);
    ms.publish(OutputEvent::exit(ms.id.clone(), exit_code));
    debug!(session = %ms.id, exit_code, "session terminated");
}
