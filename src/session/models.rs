//! Session data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a session.
///
/// `Creating` only exists between allocation of the session record and a
/// successful process start; `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session record allocated, process not yet started.
    Creating,
    /// Subprocess is running.
    Active,
    /// Subprocess has exited and been reaped.
    Terminated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Creating => write!(f, "creating"),
            SessionState::Active => write!(f, "active"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Metadata and state for a single supervised CLI subprocess.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Unique session ID.
    pub id: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Working directory the subprocess runs in.
    pub work_dir: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// Optional display label.
    pub label: String,
}

/// Distinguishes stdout, stderr, and exit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
    Stderr,
    Exit,
}

impl OutputKind {
    /// Wire name of the stream this kind maps to.
    pub fn stream_name(&self) -> &'static str {
        match self {
            OutputKind::Stdout => "stdout",
            OutputKind::Stderr => "stderr",
            OutputKind::Exit => "exit",
        }
    }
}

/// A single unit of subprocess output: one stdout/stderr line or the
/// final exit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    pub session_id: String,
    #[serde(rename = "type")]
    pub kind: OutputKind,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl OutputEvent {
    /// Build a stdout/stderr line event stamped with the current time.
    pub fn line(session_id: impl Into<String>, kind: OutputKind, data: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    /// Build the terminal exit event for a session.
    pub fn exit(session_id: impl Into<String>, exit_code: i32) -> Self {
        Self {
            session_id: session_id.into(),
            kind: OutputKind::Exit,
            data: format!("exit_code:{exit_code}"),
            timestamp: Utc::now(),
        }
    }

    /// Parse the exit code out of an exit event payload.
    ///
    /// Returns -1 when the payload is not a well-formed `exit_code:<N>`
    /// record, mirroring the reaper's "unobtainable" sentinel.
    pub fn parse_exit_code(&self) -> i32 {
        self.data
            .strip_prefix("exit_code:")
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(-1)
    }
}
