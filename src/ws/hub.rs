//! Realtime hub: client registry, subscription bookkeeping, and
//! broadcast.
//!
//! The hub owns one bounded outbound queue per connected client and a map
//! of that client's session subscriptions. All queue writes are
//! non-blocking; a full queue drops the frame for that client only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::session::{OutputEvent, OutputKind, Session, SessionManager, SessionState};
use crate::ws::types::{
    self, Envelope, ErrorPayload, FilesUpdatePayload, SessionOutputPayload,
    SessionTerminatedPayload, SessionUpdatePayload,
};

/// One connected realtime peer.
struct ClientHandle {
    /// Outbound frames, drained by the client's writer task.
    tx: mpsc::Sender<String>,
    /// session id → subscription id.
    subscriptions: DashMap<String, String>,
}

impl ClientHandle {
    /// Non-blocking enqueue; a full or closed queue drops the frame.
    fn enqueue(&self, frame: String) {
        let _ = self.tx.try_send(frame);
    }
}

/// Owns client connections and routes session/file events to them.
pub struct Hub {
    manager: Arc<SessionManager>,
    clients: DashMap<u64, Arc<ClientHandle>>,
    next_client_id: AtomicU64,
    outbound_capacity: usize,
}

impl Hub {
    pub fn new(manager: Arc<SessionManager>, outbound_capacity: usize) -> Self {
        Self {
            manager,
            clients: DashMap::new(),
            next_client_id: AtomicU64::new(1),
            outbound_capacity,
        }
    }

    /// Register a new client and hand back its outbound queue.
    pub fn register_client(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        self.clients.insert(
            id,
            Arc::new(ClientHandle {
                tx,
                subscriptions: DashMap::new(),
            }),
        );
        debug!(client = id, "client registered");
        (id, rx)
    }

    /// Remove a client and revoke every subscription it holds.
    pub async fn unregister_client(&self, client_id: u64) {
        let Some((_, client)) = self.clients.remove(&client_id) else {
            return;
        };
        let subscriptions: Vec<(String, String)> = client
            .subscriptions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (session_id, sub_id) in subscriptions {
            self.manager.unsubscribe(&session_id, &sub_id).await;
        }
        debug!(client = client_id, "client unregistered");
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn client(&self, client_id: u64) -> Option<Arc<ClientHandle>> {
        self.clients.get(&client_id).map(|entry| entry.value().clone())
    }

    /// Send a message to one client.
    pub fn send_payload(&self, client_id: u64, msg_type: &str, payload: &impl Serialize) {
        let Some(frame) = encode(msg_type, payload) else {
            return;
        };
        if let Some(client) = self.client(client_id) {
            client.enqueue(frame);
        }
    }

    /// Send a message to every connected client.
    pub fn broadcast_payload(&self, msg_type: &str, payload: &impl Serialize) {
        let Some(frame) = encode(msg_type, payload) else {
            return;
        };
        for client in self.clients.iter() {
            client.enqueue(frame.clone());
        }
    }

    /// Report an error to the originating client only.
    pub fn send_error(&self, client_id: u64, code: &str, message: &str) {
        self.send_payload(
            client_id,
            types::TYPE_ERROR,
            &ErrorPayload {
                code: code.to_string(),
                message: message.to_string(),
            },
        );
    }

    /// Send the current session list to a newly connected client, one
    /// `session.update` per session.
    pub async fn send_session_list(&self, client_id: u64) {
        for session in self.manager.list().await {
            self.send_payload(
                client_id,
                types::TYPE_SESSION_UPDATE,
                &session_update_payload(&session),
            );
        }
    }

    /// Announce a session's current state to every client.
    pub fn broadcast_session_update(&self, session: &Session) {
        self.broadcast_payload(types::TYPE_SESSION_UPDATE, &session_update_payload(session));
    }

    /// Broadcast file activity for a session to every client. Called by
    /// the directory watcher through its update callback.
    pub fn on_file_update(&self, session_id: &str, file_count: u64, drink_count: u64) {
        self.broadcast_payload(
            types::TYPE_FILES_UPDATE,
            &FilesUpdatePayload {
                session_id: session_id.to_string(),
                file_count,
                drink_count,
            },
        );
    }

    /// Subscribe one client to a session's output: replay the recorded
    /// history into its queue, then forward live events until the
    /// subscription closes. Already-subscribed clients are left alone.
    pub async fn subscribe_client(&self, client_id: u64, session_id: &str) {
        let Some(client) = self.client(client_id) else {
            return;
        };
        if client.subscriptions.contains_key(session_id) {
            return;
        }

        let sub = match self.manager.subscribe(session_id).await {
            Ok(sub) => sub,
            Err(err) => {
                debug!(client = client_id, session = session_id, error = %err, "subscribe failed");
                return;
            }
        };
        client
            .subscriptions
            .insert(session_id.to_string(), sub.id.clone());

        for event in &sub.history {
            if let Some(frame) = output_frame(event) {
                client.enqueue(frame);
            }
        }

        let forwarder_client = client.clone();
        let mut events = sub.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let Some(frame) = output_frame(&event) {
                    forwarder_client.enqueue(frame);
                }
            }
        });
    }

    /// Subscribe every connected client to a session's output.
    pub async fn subscribe_all_clients(&self, session_id: &str) {
        let ids: Vec<u64> = self.clients.iter().map(|c| *c.key()).collect();
        for id in ids {
            self.subscribe_client(id, session_id).await;
        }
    }

    /// Subscribe one client to every non-terminated session, so it
    /// receives output for sessions that predate the connection.
    pub async fn subscribe_to_active_sessions(&self, client_id: u64) {
        for session in self.manager.list().await {
            if session.state != SessionState::Terminated {
                self.subscribe_client(client_id, &session.id).await;
            }
        }
    }
}

fn encode(msg_type: &str, payload: &impl Serialize) -> Option<String> {
    let envelope = match Envelope::new(msg_type, payload) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(msg_type, error = %err, "failed to encode payload");
            return None;
        }
    };
    match serde_json::to_string(&envelope) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(msg_type, error = %err, "failed to serialize envelope");
            None
        }
    }
}

fn session_update_payload(session: &Session) -> SessionUpdatePayload {
    SessionUpdatePayload {
        id: session.id.clone(),
        state: session.state.to_string(),
        work_dir: session.work_dir.clone(),
        label: session.label.clone(),
        created_at: types::wire_timestamp(session.created_at),
    }
}

/// Convert an output event into its wire frame: `session.output` for
/// stdout/stderr lines, `session.terminated` for the exit record.
fn output_frame(event: &OutputEvent) -> Option<String> {
    match event.kind {
        OutputKind::Exit => encode(
            types::TYPE_SESSION_TERMINATED,
            &SessionTerminatedPayload {
                session_id: event.session_id.clone(),
                exit_code: event.parse_exit_code(),
            },
        ),
        OutputKind::Stdout | OutputKind::Stderr => encode(
            types::TYPE_SESSION_OUTPUT,
            &SessionOutputPayload {
                session_id: event.session_id.clone(),
                stream: event.kind.stream_name().to_string(),
                data: event.data.clone(),
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ManagerConfig;
    use std::time::Duration;
    use tokio::time::timeout;

    fn test_hub(command: &str, args: &[&str], capacity: usize) -> Hub {
        let config = ManagerConfig {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            graceful_timeout: Duration::from_millis(200),
            ..ManagerConfig::default()
        };
        Hub::new(Arc::new(SessionManager::new(config)), capacity)
    }

    async fn next_frame(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let frame = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbound queue closed");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_all_clients() {
        let hub = test_hub("cat", &[], 16);
        let (_a, mut rx_a) = hub.register_client();
        let (_b, mut rx_b) = hub.register_client();

        hub.on_file_update("s1", 142, 7);

        for rx in [&mut rx_a, &mut rx_b] {
            let frame = next_frame(rx).await;
            assert_eq!(frame["type"], "files.update");
            assert_eq!(frame["payload"]["fileCount"], 142);
            assert_eq!(frame["payload"]["drinkCount"], 7);
        }
    }

    #[tokio::test]
    async fn errors_are_directed() {
        let hub = test_hub("cat", &[], 16);
        let (a, mut rx_a) = hub.register_client();
        let (_b, mut rx_b) = hub.register_client();

        hub.send_error(a, "SESSION_NOT_FOUND", "session not found: x");

        let frame = next_frame(&mut rx_a).await;
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["payload"]["code"], "SESSION_NOT_FOUND");

        // Other client saw nothing.
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_outbound_queue_drops_frames() {
        let hub = test_hub("cat", &[], 1);
        let (_a, mut rx) = hub.register_client();

        hub.on_file_update("s1", 1, 0);
        hub.on_file_update("s1", 2, 0); // dropped: queue full

        let first = next_frame(&mut rx).await;
        assert_eq!(first["payload"]["fileCount"], 1);
        assert!(rx.try_recv().is_err());

        // After drain the next frame gets through.
        hub.on_file_update("s1", 3, 0);
        let third = next_frame(&mut rx).await;
        assert_eq!(third["payload"]["fileCount"], 3);
    }

    #[tokio::test]
    async fn subscribed_client_streams_output_and_termination() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub("cat", &[], 64);
        let session = hub
            .manager
            .create(dir.path().to_str().unwrap(), "stream")
            .await
            .unwrap();

        let (client_id, mut rx) = hub.register_client();
        hub.subscribe_client(client_id, &session.id).await;
        hub.subscribe_client(client_id, &session.id).await; // no-op

        hub.manager.send_prompt(&session.id, "hello").await.unwrap();
        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "session.output");
        assert_eq!(frame["payload"]["stream"], "stdout");
        assert_eq!(frame["payload"]["data"], "hello");

        hub.manager.kill(&session.id).await.unwrap();
        loop {
            let frame = next_frame(&mut rx).await;
            if frame["type"] == "session.terminated" {
                assert_eq!(frame["payload"]["sessionId"], session.id.as_str());
                break;
            }
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_history_then_termination() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub("sh", &["-c", "echo L1; exit 2"], 64);
        let session = hub
            .manager
            .create(dir.path().to_str().unwrap(), "")
            .await
            .unwrap();

        // Wait for the session to terminate.
        for _ in 0..100 {
            if hub.manager.get(&session.id).await.unwrap().state == SessionState::Terminated {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let (client_id, mut rx) = hub.register_client();
        hub.subscribe_client(client_id, &session.id).await;

        let first = next_frame(&mut rx).await;
        assert_eq!(first["type"], "session.output");
        assert_eq!(first["payload"]["data"], "L1");

        let second = next_frame(&mut rx).await;
        assert_eq!(second["type"], "session.terminated");
        assert_eq!(second["payload"]["exitCode"], 2);
    }

    #[tokio::test]
    async fn unregister_revokes_subscriptions() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub("cat", &[], 64);
        let session = hub
            .manager
            .create(dir.path().to_str().unwrap(), "")
            .await
            .unwrap();

        let (client_id, mut rx) = hub.register_client();
        hub.subscribe_client(client_id, &session.id).await;
        hub.unregister_client(client_id).await;
        assert_eq!(hub.client_count(), 0);

        // All senders are gone once the forwarder observes the closed
        // subscription, so the outbound queue ends.
        loop {
            match timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => panic!("outbound queue never closed"),
            }
        }

        hub.manager.kill(&session.id).await.unwrap();
    }

    #[tokio::test]
    async fn session_list_sent_per_session() {
        let dir = tempfile::tempdir().unwrap();
        let hub = test_hub("cat", &[], 64);
        let session = hub
            .manager
            .create(dir.path().to_str().unwrap(), "listed")
            .await
            .unwrap();

        let (client_id, mut rx) = hub.register_client();
        hub.send_session_list(client_id).await;

        let frame = next_frame(&mut rx).await;
        assert_eq!(frame["type"], "session.update");
        assert_eq!(frame["payload"]["id"], session.id.as_str());
        assert_eq!(frame["payload"]["state"], "active");
        assert_eq!(frame["payload"]["label"], "listed");

        hub.manager.kill(&session.id).await.unwrap();
    }
}
