//! Per-connection task — WebSocket I/O and command forwarding.
//!
//! Each accepted WebSocket runs [`run_connection`], which:
//! 1. Registers the client with the broker loop, handing over the
//!    sending half of its outbound channel.
//! 2. Spawns a writer task that drains the outbound channel into the
//!    socket, so sends never run inside the broker loop.
//! 3. Reads text frames, decodes them, and forwards known messages to
//!    the broker loop. Bad payloads are logged and the socket stays open.
//! 4. On exit, notifies the broker loop for the disconnect cascade.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::ipc::codec::{DecodeResult, decode_frame, encode_message};
use crate::ipc::protocol::{ClientMessage, CloseCode, Role, ServerMessage};

use super::Broker;
use super::state::{BrokerSnapshot, ConnectionId};

/// Work item for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Message(ServerMessage),
    /// Send a close frame and stop writing.
    Close(CloseCode),
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Command sent to the broker loop.
#[derive(Debug)]
pub enum BrokerCommand {
    Register {
        client_id: String,
        role: Role,
        connection_id: ConnectionId,
        outbound: OutboundSender,
    },
    Message {
        client_id: String,
        role: Role,
        connection_id: ConnectionId,
        message: ClientMessage,
    },
    Disconnect {
        client_id: String,
        connection_id: ConnectionId,
    },
    Snapshot {
        reply: oneshot::Sender<BrokerSnapshot>,
    },
}

/// Connection-level errors.
#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("websocket receive failed: {0}")]
    Receive(#[from] axum::Error),
    #[error("broker loop closed")]
    BrokerGone,
}

/// Drive one live-chat WebSocket until either side closes it.
pub async fn run_connection(socket: WebSocket, client_id: String, role: Role, broker: Broker) {
    let connection_id = ConnectionId::new();
    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Outbound>();

    if broker
        .register(client_id.clone(), role, connection_id, tx)
        .is_err()
    {
        tracing::error!(client_id = %client_id, "broker unavailable, dropping connection");
        return;
    }

    let mut writer = tokio::spawn(writer_task(ws_sender, rx));

    if let Err(e) = read_loop(
        ws_receiver,
        &mut writer,
        &broker,
        &client_id,
        role,
        connection_id,
    )
    .await
    {
        tracing::debug!(client_id = %client_id, %connection_id, error = %e, "connection closed");
    }

    // Always notify the broker; it decides whether this is still the
    // current connection for the client id.
    broker.disconnect(client_id.clone(), connection_id);
    tracing::info!(client_id = %client_id, %connection_id, "websocket ended");
}

async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    writer: &mut tokio::task::JoinHandle<()>,
    broker: &Broker,
    client_id: &str,
    role: Role,
    connection_id: ConnectionId,
) -> Result<(), ConnectionError> {
    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => return Err(ConnectionError::Receive(e)),
                    None => return Ok(()), // Clean disconnect.
                };
                match msg {
                    Message::Text(text) => {
                        handle_text(broker, client_id, role, connection_id, text.as_str())?;
                    }
                    Message::Close(frame) => {
                        tracing::debug!(client_id, reason = ?frame, "client initiated close");
                        return Ok(());
                    }
                    Message::Binary(_) => {
                        tracing::debug!(client_id, "binary frame ignored");
                    }
                    // Ping replies are handled by the WebSocket layer.
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
            // Writer finished: we were closed by the broker or the socket broke.
            _ = &mut *writer => return Ok(()),
        }
    }
}

fn handle_text(
    broker: &Broker,
    client_id: &str,
    role: Role,
    connection_id: ConnectionId,
    text: &str,
) -> Result<(), ConnectionError> {
    match decode_frame(text) {
        DecodeResult::Ok(message) => {
            tracing::debug!(client_id, message = ?message, "inbound message");
            broker
                .dispatch(client_id.to_string(), role, connection_id, message)
                .map_err(|_| ConnectionError::BrokerGone)
        }
        DecodeResult::UnknownType(tag) => {
            tracing::error!(
                client_id,
                msg_type = tag.as_deref().unwrap_or("<missing>"),
                "unrecognized message"
            );
            Ok(())
        }
        DecodeResult::Malformed(e) => {
            tracing::error!(client_id, error = %e, payload = text, "invalid JSON");
            Ok(())
        }
    }
}

/// Writer task: forwards outbound items to the WebSocket sink.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Message(message) => {
                let text = match encode_message(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode outbound message");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    // Socket is broken; dropping rx makes later broker
                    // sends fail, which unwinds this client.
                    break;
                }
            }
            Outbound::Close(code) => {
                let frame = CloseFrame {
                    code: code.code(),
                    reason: code.reason().into(),
                };
                // Peer may already be gone.
                let _ = ws_sender.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}
