//! Realtime wire protocol: message envelope, payloads, and inbound
//! validation.
//!
//! Every frame is a self-describing envelope `{type, payload, timestamp}`.
//! Unknown payload fields are ignored; missing required fields reject the
//! message.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::watcher::{ConfigFile, FileNode};

// Server → client message types.
pub const TYPE_SESSION_UPDATE: &str = "session.update";
pub const TYPE_SESSION_OUTPUT: &str = "session.output";
pub const TYPE_SESSION_TERMINATED: &str = "session.terminated";
pub const TYPE_FILES_UPDATE: &str = "files.update";
pub const TYPE_FILES_TREE: &str = "files.tree";
pub const TYPE_CLAUDE_CONFIG: &str = "claude.config";
pub const TYPE_ERROR: &str = "error";

// Client → server message types.
pub const TYPE_SESSION_CREATE: &str = "session.create";
pub const TYPE_SESSION_PROMPT: &str = "session.prompt";
pub const TYPE_SESSION_KILL: &str = "session.kill";
pub const TYPE_FILES_REQUEST_TREE: &str = "files.requestTree";
pub const TYPE_CLAUDE_REQUEST_CONFIG: &str = "claude.requestConfig";

/// Stable error code for rejected client messages.
pub const ERR_INVALID_MESSAGE: &str = "INVALID_MESSAGE";

/// Envelope for all outbound realtime messages.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Wrap a payload with the current UTC timestamp.
    pub fn new(msg_type: &str, payload: &impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            msg_type: msg_type.to_string(),
            payload: serde_json::to_value(payload)?,
            timestamp: Utc::now(),
        })
    }
}

/// RFC 3339 timestamp with nanosecond precision, as carried in
/// `session.update` payloads.
pub fn wire_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// ---------------------------------------------------------------------------
// Server → client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdatePayload {
    pub id: String,
    pub state: String,
    pub work_dir: String,
    pub label: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutputPayload {
    pub session_id: String,
    /// "stdout" or "stderr".
    pub stream: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTerminatedPayload {
    pub session_id: String,
    pub exit_code: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesUpdatePayload {
    pub session_id: String,
    pub file_count: u64,
    pub drink_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesTreePayload {
    pub session_id: String,
    pub tree: Vec<FileNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeConfigPayload {
    pub session_id: String,
    pub files: Vec<ConfigFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Client → server validation
// ---------------------------------------------------------------------------

/// Why an inbound message was rejected. Always maps to
/// [`ERR_INVALID_MESSAGE`] on the wire.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A validated client request, ready to route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    CreateSession { work_dir: String, label: String },
    SendPrompt { session_id: String, prompt: String },
    KillSession { session_id: String },
    RequestTree { session_id: String },
    RequestConfig { session_id: String },
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    msg_type: Option<String>,
    payload: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CreatePayload {
    work_dir: String,
    label: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PromptPayload {
    session_id: String,
    prompt: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SessionIdPayload {
    session_id: String,
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    msg_type: &str,
    payload: serde_json::Value,
) -> Result<T, ValidationError> {
    serde_json::from_value(payload)
        .map_err(|err| ValidationError::new(format!("invalid payload for {msg_type}: {err}")))
}

fn require(field: &str, value: &str, msg_type: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new(format!(
            "missing required field '{field}' in {msg_type} payload"
        )));
    }
    Ok(())
}

/// Validate a raw client frame into a routable command.
pub fn validate_client_message(raw: &str) -> Result<ClientCommand, ValidationError> {
    let envelope: InboundEnvelope = serde_json::from_str(raw)
        .map_err(|err| ValidationError::new(format!("invalid JSON: {err}")))?;

    let msg_type = envelope
        .msg_type
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ValidationError::new("missing 'type' field"))?;

    let payload = envelope
        .payload
        .ok_or_else(|| ValidationError::new("missing 'payload' field"))?;

    match msg_type.as_str() {
        TYPE_SESSION_CREATE => {
            let p: CreatePayload = decode_payload(&msg_type, payload)?;
            require("workDir", &p.work_dir, &msg_type)?;
            Ok(ClientCommand::CreateSession {
                work_dir: p.work_dir,
                label: p.label,
            })
        }
        TYPE_SESSION_PROMPT => {
            let p: PromptPayload = decode_payload(&msg_type, payload)?;
            require("sessionId", &p.session_id, &msg_type)?;
            require("prompt", &p.prompt, &msg_type)?;
            Ok(ClientCommand::SendPrompt {
                session_id: p.session_id,
                prompt: p.prompt,
            })
        }
        TYPE_SESSION_KILL => {
            let p: SessionIdPayload = decode_payload(&msg_type, payload)?;
            require("sessionId", &p.session_id, &msg_type)?;
            Ok(ClientCommand::KillSession {
                session_id: p.session_id,
            })
        }
        TYPE_FILES_REQUEST_TREE => {
            let p: SessionIdPayload = decode_payload(&msg_type, payload)?;
            require("sessionId", &p.session_id, &msg_type)?;
            Ok(ClientCommand::RequestTree {
                session_id: p.session_id,
            })
        }
        TYPE_CLAUDE_REQUEST_CONFIG => {
            let p: SessionIdPayload = decode_payload(&msg_type, payload)?;
            require("sessionId", &p.session_id, &msg_type)?;
            Ok(ClientCommand::RequestConfig {
                session_id: p.session_id,
            })
        }
        other => Err(ValidationError::new(format!(
            "unknown message type: {other}"
        ))),
    }
}
