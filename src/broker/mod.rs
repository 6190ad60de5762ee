//! Live-chat broker — connection registry, wait queue, pairing, relay.
//!
//! Architecture: channel-based actor. A single broker loop owns all
//! mutable state ([`state::BrokerState`]); one loop iteration is the
//! exclusion region for an operation. Per-connection tasks forward
//! commands via an mpsc channel, and each connection has its own
//! outbound channel drained by a writer task, so the loop never waits
//! on a slow peer. Effects of one operation are pushed in order, which
//! keeps per-recipient ordering.
//!
//! A failed push means the recipient's writer is gone; the recipient
//! is unregistered on the spot, as if it had disconnected.

mod connection;
mod handler;
pub mod registry;
pub mod state;

use std::collections::{HashMap, VecDeque};

use tokio::sync::{mpsc, oneshot};

use connection::{BrokerCommand, Outbound, OutboundSender};
use state::{BrokerSnapshot, BrokerState, ConnectionId, Effect, Registration};

use crate::ipc::protocol::{ClientMessage, Role};

pub use connection::run_connection;

/// Broker handle errors.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker loop closed")]
    Closed,
}

/// Cloneable handle to the broker loop.
#[derive(Debug, Clone)]
pub struct Broker {
    tx: mpsc::UnboundedSender<BrokerCommand>,
}

impl Broker {
    /// Start the broker loop on the current runtime.
    ///
    /// The loop stops once every handle has been dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx }
    }

    pub fn register(
        &self,
        client_id: String,
        role: Role,
        connection_id: ConnectionId,
        outbound: OutboundSender,
    ) -> Result<(), BrokerError> {
        self.send(BrokerCommand::Register {
            client_id,
            role,
            connection_id,
            outbound,
        })
    }

    pub fn dispatch(
        &self,
        client_id: String,
        role: Role,
        connection_id: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), BrokerError> {
        self.send(BrokerCommand::Message {
            client_id,
            role,
            connection_id,
            message,
        })
    }

    /// Report that a connection ended. Best-effort.
    pub fn disconnect(&self, client_id: String, connection_id: ConnectionId) {
        let _ = self.send(BrokerCommand::Disconnect {
            client_id,
            connection_id,
        });
    }

    /// Current wait queue and active chats.
    pub async fn snapshot(&self) -> Result<BrokerSnapshot, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCommand::Snapshot { reply })?;
        rx.await.map_err(|_| BrokerError::Closed)
    }

    fn send(&self, command: BrokerCommand) -> Result<(), BrokerError> {
        self.tx.send(command).map_err(|_| BrokerError::Closed)
    }
}

/// Broker loop. Owns the state and every connection's outbound sender.
async fn run(mut rx: mpsc::UnboundedReceiver<BrokerCommand>) {
    let mut state = BrokerState::new();
    let mut outbound: HashMap<ConnectionId, OutboundSender> = HashMap::new();

    tracing::info!("broker started");
    while let Some(command) = rx.recv().await {
        let effects = handle_command(&mut state, &mut outbound, command);
        apply(&mut state, &mut outbound, effects);
    }
    tracing::info!("broker stopped");
}

fn handle_command(
    state: &mut BrokerState,
    outbound: &mut HashMap<ConnectionId, OutboundSender>,
    command: BrokerCommand,
) -> Vec<Effect> {
    match command {
        BrokerCommand::Register {
            client_id,
            role,
            connection_id,
            outbound: tx,
        } => {
            outbound.insert(connection_id, tx);
            let (outcome, effects) = state.register(&client_id, role, connection_id);
            if let Registration::Superseded(prior) = outcome {
                tracing::info!(client_id = %client_id, %prior, "prior connection superseded");
            }
            effects
        }
        BrokerCommand::Message {
            client_id,
            role,
            connection_id,
            message,
        } => {
            if !state.is_current(&client_id, connection_id) {
                tracing::debug!(client_id = %client_id, %connection_id, "message from stale connection dropped");
                return Vec::new();
            }
            handler::handle_message(state, &client_id, role, message)
        }
        BrokerCommand::Disconnect {
            client_id,
            connection_id,
        } => {
            // A superseded connection must not unwind its replacement.
            if state
                .connection_of(&client_id)
                .is_some_and(|current| current != connection_id)
            {
                outbound.remove(&connection_id);
                return Vec::new();
            }
            state.unregister(&client_id)
        }
        BrokerCommand::Snapshot { reply } => {
            let _ = reply.send(state.snapshot());
            Vec::new()
        }
    }
}

/// Carry out effects in order. Send failures unwind the recipient and
/// append the resulting effects.
fn apply(
    state: &mut BrokerState,
    outbound: &mut HashMap<ConnectionId, OutboundSender>,
    effects: Vec<Effect>,
) {
    let mut pending: VecDeque<Effect> = effects.into();
    while let Some(effect) = pending.pop_front() {
        match effect {
            Effect::Send { to, message } => {
                // Recipient may have been unwound earlier in this batch.
                let Some(connection) = state.connection_of(&to) else {
                    continue;
                };
                let delivered = outbound
                    .get(&connection)
                    .is_some_and(|tx| tx.send(Outbound::Message(message)).is_ok());
                if !delivered {
                    tracing::warn!(client_id = %to, "send failed, treating as disconnect");
                    pending.extend(state.unregister(&to));
                }
            }
            Effect::Close { connection, code } => {
                if let Some(tx) = outbound.remove(&connection) {
                    // Writer may already be gone.
                    let _ = tx.send(Outbound::Close(code));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    use crate::assistant::Unconfigured;
    use crate::ipc::protocol::{CloseCode, ServerMessage};
    use crate::server::{AppState, build_router};
    use crate::store::SqliteStore;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    // -- Loop-level tests (no sockets) --

    fn connect_raw(
        state: &mut BrokerState,
        outbound: &mut HashMap<ConnectionId, OutboundSender>,
        client_id: &str,
        role: Role,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Outbound>) {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let effects = handle_command(
            state,
            outbound,
            BrokerCommand::Register {
                client_id: client_id.into(),
                role,
                connection_id,
                outbound: tx,
            },
        );
        apply(state, outbound, effects);
        (connection_id, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Message(m) = item {
                out.push(m);
            }
        }
        out
    }

    #[test]
    fn dead_recipient_is_unwound_on_send() {
        let mut state = BrokerState::new();
        let mut outbound = HashMap::new();
        let (_, mut a1) = connect_raw(&mut state, &mut outbound, "A1", Role::Agent);
        let (_, u1) = connect_raw(&mut state, &mut outbound, "U1", Role::User);
        drain(&mut a1);

        let effects = state.enqueue("U1");
        apply(&mut state, &mut outbound, effects);
        let effects = state.accept_pairing("A1", "U1");

        // U1's writer is gone before chat_started goes out.
        drop(u1);
        apply(&mut state, &mut outbound, effects);

        assert!(state.connection_of("U1").is_none());
        assert!(state.snapshot().active_chats.is_empty());
        assert_eq!(
            drain(&mut a1),
            vec![
                ServerMessage::QueueUpdate {
                    queue: vec!["U1".into()]
                },
                ServerMessage::ChatAccepted {
                    user_id: "U1".into()
                },
                ServerMessage::QueueUpdate { queue: vec![] },
                ServerMessage::ChatEndedConfirmation {
                    user_id: "U1".into()
                },
            ]
        );
    }

    #[test]
    fn stale_disconnect_keeps_replacement() {
        let mut state = BrokerState::new();
        let mut outbound = HashMap::new();
        let (old, mut old_rx) = connect_raw(&mut state, &mut outbound, "U1", Role::User);
        let (new, _new_rx) = connect_raw(&mut state, &mut outbound, "U1", Role::User);

        match old_rx.try_recv() {
            Ok(Outbound::Close(code)) => assert_eq!(code, CloseCode::GoingAway),
            other => panic!("expected close, got {other:?}"),
        }

        let effects = handle_command(
            &mut state,
            &mut outbound,
            BrokerCommand::Disconnect {
                client_id: "U1".into(),
                connection_id: old,
            },
        );
        assert!(effects.is_empty());
        assert!(state.is_current("U1", new));
        assert!(outbound.contains_key(&new));
    }

    #[test]
    fn stale_message_is_dropped() {
        let mut state = BrokerState::new();
        let mut outbound = HashMap::new();
        let (old, _old_rx) = connect_raw(&mut state, &mut outbound, "U1", Role::User);
        let (_new, _new_rx) = connect_raw(&mut state, &mut outbound, "U1", Role::User);

        let effects = handle_command(
            &mut state,
            &mut outbound,
            BrokerCommand::Message {
                client_id: "U1".into(),
                role: Role::User,
                connection_id: old,
                message: ClientMessage::RequestChat,
            },
        );
        assert!(effects.is_empty());
        assert!(state.snapshot().queue.is_empty());
    }

    // -- End-to-end over WebSocket --

    /// Start the HTTP service on an ephemeral port and return its address.
    async fn start_server() -> std::net::SocketAddr {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let state = AppState::new(Broker::spawn(), store, Arc::new(Unconfigured));
        let app = build_router(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn connect(addr: std::net::SocketAddr, role: &str, id: &str) -> Client {
        let url = format!("ws://{addr}/ws/livechat/{role}/{id}");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    async fn send(ws: &mut Client, v: Value) {
        ws.send(Message::Text(v.to_string().into())).await.unwrap();
    }

    /// Next JSON message, failing after a short timeout.
    async fn recv(ws: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out waiting for message")
                .expect("stream ended")
                .unwrap();
            match msg {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("expected text, got {other:?}"),
            }
        }
    }

    /// Assert nothing arrives within a short window.
    async fn assert_silent(ws: &mut Client) {
        match tokio::time::timeout(Duration::from_millis(150), ws.next()).await {
            Err(_) => {}
            Ok(other) => panic!("expected no message, got {other:?}"),
        }
    }

    /// Scenarios 1–3: agent joins, user queues, agent accepts.
    async fn paired_session(addr: std::net::SocketAddr) -> (Client, Client) {
        let mut a1 = connect(addr, "agent", "A1").await;
        assert_eq!(recv(&mut a1).await, json!({"type": "queue_update", "queue": []}));

        let mut u1 = connect(addr, "user", "U1").await;
        send(&mut u1, json!({"type": "request_chat"})).await;
        assert_eq!(
            recv(&mut a1).await,
            json!({"type": "queue_update", "queue": ["U1"]})
        );

        send(&mut a1, json!({"type": "accept_chat", "user_id": "U1"})).await;
        assert_eq!(recv(&mut u1).await, json!({"type": "chat_started"}));
        assert_eq!(
            recv(&mut a1).await,
            json!({"type": "chat_accepted", "user_id": "U1"})
        );
        assert_eq!(recv(&mut a1).await, json!({"type": "queue_update", "queue": []}));
        (a1, u1)
    }

    #[tokio::test]
    async fn full_chat_flow() {
        let addr = start_server().await;
        let (mut a1, mut u1) = paired_session(addr).await;

        // Scenario 4: user → agent, tagged with the sender.
        send(&mut u1, json!({"type": "message", "content": "Hi"})).await;
        assert_eq!(
            recv(&mut a1).await,
            json!({"type": "message", "user_id": "U1", "content": "Hi"})
        );

        // Agent → user, untagged.
        send(
            &mut a1,
            json!({"type": "message", "user_id": "U1", "content": "Hello, how can I help?"}),
        )
        .await;
        assert_eq!(
            recv(&mut u1).await,
            json!({"type": "message", "content": "Hello, how can I help?"})
        );

        // Scenario 5: agent ends the chat.
        send(&mut a1, json!({"type": "end_chat", "user_id": "U1"})).await;
        assert_eq!(recv(&mut u1).await, json!({"type": "chat_ended"}));
        assert_eq!(
            recv(&mut a1).await,
            json!({"type": "chat_ended_confirmation", "user_id": "U1"})
        );

        // Relay is denied both ways afterwards.
        send(&mut u1, json!({"type": "message", "content": "still there?"})).await;
        send(&mut a1, json!({"type": "message", "user_id": "U1", "content": "bye"})).await;
        assert_silent(&mut a1).await;
        assert_silent(&mut u1).await;
    }

    #[tokio::test]
    async fn agent_disconnect_ends_chat_without_requeue() {
        let addr = start_server().await;
        let (mut a1, mut u1) = paired_session(addr).await;

        // Scenario 6.
        a1.close(None).await.unwrap();
        assert_eq!(recv(&mut u1).await, json!({"type": "chat_ended"}));

        let mut a2 = connect(addr, "agent", "A2").await;
        assert_eq!(recv(&mut a2).await, json!({"type": "queue_update", "queue": []}));
    }

    #[tokio::test]
    async fn unpaired_agent_cannot_message_user() {
        let addr = start_server().await;
        let (mut a1, mut u1) = paired_session(addr).await;

        // Scenario 7.
        let mut a2 = connect(addr, "agent", "A2").await;
        assert_eq!(recv(&mut a2).await, json!({"type": "queue_update", "queue": []}));
        send(&mut a2, json!({"type": "message", "user_id": "U1", "content": "hi"})).await;
        assert_silent(&mut u1).await;
        assert_silent(&mut a1).await;
    }

    #[tokio::test]
    async fn user_disconnect_confirms_to_agent() {
        let addr = start_server().await;
        let (mut a1, u1) = paired_session(addr).await;

        drop(u1);
        assert_eq!(
            recv(&mut a1).await,
            json!({"type": "chat_ended_confirmation", "user_id": "U1"})
        );
    }

    #[tokio::test]
    async fn queued_user_disconnect_updates_agents() {
        let addr = start_server().await;
        let mut a1 = connect(addr, "agent", "A1").await;
        recv(&mut a1).await;

        let mut u1 = connect(addr, "user", "U1").await;
        let mut u2 = connect(addr, "user", "U2").await;
        send(&mut u1, json!({"type": "request_chat"})).await;
        assert_eq!(recv(&mut a1).await["queue"], json!(["U1"]));
        send(&mut u2, json!({"type": "request_chat"})).await;
        assert_eq!(recv(&mut a1).await["queue"], json!(["U1", "U2"]));

        u1.close(None).await.unwrap();
        assert_eq!(recv(&mut a1).await["queue"], json!(["U2"]));
    }

    #[tokio::test]
    async fn duplicate_id_closes_old_connection() {
        let addr = start_server().await;
        let mut a1 = connect(addr, "agent", "A1").await;
        recv(&mut a1).await;

        let mut old = connect(addr, "user", "U1").await;
        send(&mut old, json!({"type": "request_chat"})).await;
        assert_eq!(recv(&mut a1).await["queue"], json!(["U1"]));

        let mut new = connect(addr, "user", "U1").await;
        // Queue entry of the old connection is unwound.
        assert_eq!(recv(&mut a1).await["queue"], json!([]));

        match tokio::time::timeout(Duration::from_secs(2), old.next()).await {
            Ok(Some(Ok(Message::Close(Some(frame))))) => {
                assert_eq!(u16::from(frame.code), CloseCode::GoingAway.code());
            }
            other => panic!("expected going-away close, got {other:?}"),
        }

        // The replacement is fully functional.
        send(&mut new, json!({"type": "request_chat"})).await;
        assert_eq!(recv(&mut a1).await["queue"], json!(["U1"]));
    }

    #[tokio::test]
    async fn unsupported_role_is_rejected() {
        let addr = start_server().await;
        let mut ws = connect(addr, "admin", "X1").await;
        match tokio::time::timeout(Duration::from_secs(2), ws.next()).await {
            Ok(Some(Ok(Message::Close(Some(frame))))) => {
                assert_eq!(u16::from(frame.code), 1003);
            }
            other => panic!("expected unsupported-data close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_payloads_keep_connection_open() {
        let addr = start_server().await;
        let mut a1 = connect(addr, "agent", "A1").await;
        recv(&mut a1).await;
        let mut u1 = connect(addr, "user", "U1").await;

        u1.send(Message::Text("{not json".into())).await.unwrap();
        send(&mut u1, json!({"type": "frobnicate"})).await;
        send(&mut u1, json!({"type": "request_chat"})).await;

        assert_eq!(recv(&mut a1).await["queue"], json!(["U1"]));
    }

    #[tokio::test]
    async fn status_endpoint_reports_snapshot() {
        let addr = start_server().await;
        let (_a1, _u1) = paired_session(addr).await;

        let body: Value = reqwest::get(format!("http://{addr}/livechat/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({"queue": [], "active_chats": {"U1": "A1"}}));
    }
}
