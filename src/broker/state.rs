//! Broker state — connection registry, wait queue, pairing table.
//!
//! All methods are pure state transitions with no I/O. Each operation
//! returns the ordered list of [`Effect`]s the broker loop must carry
//! out; policy violations produce no effects rather than errors.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use uuid::Uuid;

use super::registry::WaitQueue;
use crate::ipc::protocol::{CloseCode, Role, ServerMessage};

/// Unique identifier for one WebSocket connection.
///
/// A client id can be claimed by several connections over time; the
/// connection id tells the current holder apart from superseded ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outbound work produced by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Deliver a message to the live connection of a client id.
    Send { to: String, message: ServerMessage },
    /// Close a specific connection (it has already left the registry).
    Close {
        connection: ConnectionId,
        code: CloseCode,
    },
}

/// Outcome of [`BrokerState::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Accepted,
    /// A prior connection held the same client id and was unwound.
    Superseded(ConnectionId),
}

/// Registry entry for a live party. Role is fixed for its lifetime.
#[derive(Debug, Clone, Copy)]
struct Connection {
    id: ConnectionId,
    role: Role,
}

/// Point-in-time copy of the queue and pairing table.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct BrokerSnapshot {
    pub queue: Vec<String>,
    /// user id → agent id
    pub active_chats: BTreeMap<String, String>,
}

/// Broker state — the four registries.
///
/// Owned exclusively by the broker loop. No concurrent access.
/// The role set is the subset of `connections` tagged [`Role::Agent`].
#[derive(Debug, Default)]
pub struct BrokerState {
    /// Live connections keyed by client id.
    connections: HashMap<String, Connection>,
    /// Users awaiting an agent.
    queue: WaitQueue,
    /// user id → agent id. A user id here is never in `queue`.
    pairings: BTreeMap<String, String>,
}

impl BrokerState {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Connection registry --

    /// Accept a new connection for `client_id`.
    ///
    /// An existing connection under the same id is closed with
    /// [`CloseCode::GoingAway`] and fully unwound first. Agents get the
    /// current queue right away.
    pub fn register(
        &mut self,
        client_id: &str,
        role: Role,
        connection: ConnectionId,
    ) -> (Registration, Vec<Effect>) {
        let mut effects = Vec::new();
        let mut outcome = Registration::Accepted;

        if let Some(prior) = self.connections.get(client_id) {
            tracing::warn!(
                client_id,
                prior = %prior.id,
                "client already connected, closing old connection"
            );
            outcome = Registration::Superseded(prior.id);
            effects.extend(self.disconnect(client_id, CloseCode::GoingAway));
        }

        self.connections.insert(
            client_id.to_string(),
            Connection {
                id: connection,
                role,
            },
        );
        tracing::info!(client_id, %role, %connection, "client connected");

        if role == Role::Agent {
            effects.extend(self.broadcast_queue());
        }
        (outcome, effects)
    }

    /// Remove a client and run the disconnect cascade. Idempotent.
    ///
    /// The cascade runs even when no connection is registered, so stale
    /// queue or pairing entries for the id are still cleaned up.
    pub fn unregister(&mut self, client_id: &str) -> Vec<Effect> {
        self.disconnect(client_id, CloseCode::Normal)
    }

    fn disconnect(&mut self, client_id: &str, code: CloseCode) -> Vec<Effect> {
        let mut effects = Vec::new();

        let role = self.connections.remove(client_id).map(|conn| {
            effects.push(Effect::Close {
                connection: conn.id,
                code,
            });
            tracing::info!(client_id, role = %conn.role, "client disconnected");
            conn.role
        });

        // Agent gone: end its chats, telling only the users.
        if role != Some(Role::User) {
            let users: Vec<String> = self
                .pairings
                .iter()
                .filter(|(_, agent)| agent.as_str() == client_id)
                .map(|(user, _)| user.clone())
                .collect();
            for user in users {
                effects.extend(self.terminate_pairing(&user, true, false));
            }
        }

        if self.queue.remove(client_id) {
            effects.extend(self.broadcast_queue());
        }

        // User gone: end its chat, telling only the agent.
        effects.extend(self.terminate_pairing(client_id, false, true));

        effects
    }

    /// Whether `connection` is the current holder of `client_id`.
    pub fn is_current(&self, client_id: &str, connection: ConnectionId) -> bool {
        self.connections
            .get(client_id)
            .is_some_and(|conn| conn.id == connection)
    }

    /// Current connection of a client, if any.
    pub fn connection_of(&self, client_id: &str) -> Option<ConnectionId> {
        self.connections.get(client_id).map(|conn| conn.id)
    }

    pub fn role_of(&self, client_id: &str) -> Option<Role> {
        self.connections.get(client_id).map(|conn| conn.role)
    }

    fn is_agent(&self, client_id: &str) -> bool {
        self.role_of(client_id) == Some(Role::Agent)
    }

    // -- Wait queue + pairing --

    /// Put a connected user at the back of the wait queue.
    ///
    /// Ignored for unknown ids, agents, users already waiting, and users
    /// already in a chat.
    pub fn enqueue(&mut self, user_id: &str) -> Vec<Effect> {
        if self.role_of(user_id) != Some(Role::User) || self.pairings.contains_key(user_id) {
            tracing::debug!(user_id, "enqueue ignored");
            return Vec::new();
        }
        if !self.queue.push(user_id) {
            return Vec::new();
        }
        tracing::info!(user_id, waiting = self.queue.len(), "user added to wait queue");
        self.broadcast_queue()
    }

    /// Move a waiting user into a chat with `agent_id`.
    pub fn accept_pairing(&mut self, agent_id: &str, user_id: &str) -> Vec<Effect> {
        if !self.queue.contains(user_id) || !self.is_agent(agent_id) {
            tracing::debug!(agent_id, user_id, "accept ignored");
            return Vec::new();
        }
        self.queue.remove(user_id);
        self.pairings
            .insert(user_id.to_string(), agent_id.to_string());

        let mut effects = Vec::new();
        effects.extend(self.notify(user_id, ServerMessage::ChatStarted));
        effects.extend(self.notify(
            agent_id,
            ServerMessage::ChatAccepted {
                user_id: user_id.to_string(),
            },
        ));
        effects.extend(self.broadcast_queue());
        tracing::info!(user_id, agent_id, "chat started");
        effects
    }

    /// End the chat of `user_id`, if any.
    ///
    /// Each notice goes out only if its flag is set and that party is
    /// still connected.
    pub fn terminate_pairing(
        &mut self,
        user_id: &str,
        notify_user: bool,
        notify_agent: bool,
    ) -> Vec<Effect> {
        let Some(agent_id) = self.pairings.remove(user_id) else {
            return Vec::new();
        };
        tracing::info!(user_id, %agent_id, "chat ended");

        let mut effects = Vec::new();
        if notify_user {
            effects.extend(self.notify(user_id, ServerMessage::ChatEnded));
        }
        if notify_agent {
            effects.extend(self.notify(
                &agent_id,
                ServerMessage::ChatEndedConfirmation {
                    user_id: user_id.to_string(),
                },
            ));
        }
        effects
    }

    // -- Relay --

    /// Forward chat content between a paired user and agent.
    ///
    /// Direction comes from the sender's registered role. An agent may
    /// only reach a user currently paired to it; a user always reaches
    /// its own agent. Everything else is dropped.
    pub fn relay(
        &mut self,
        sender_id: &str,
        content: Option<&str>,
        target_user: Option<&str>,
    ) -> Vec<Effect> {
        let Some(content) = content.filter(|c| !c.is_empty()) else {
            return Vec::new();
        };

        if self.is_agent(sender_id) {
            let Some(user_id) = target_user else {
                tracing::debug!(agent_id = sender_id, "relay without target ignored");
                return Vec::new();
            };
            if self.pairings.get(user_id).map(String::as_str) != Some(sender_id) {
                tracing::warn!(
                    agent_id = sender_id,
                    user_id,
                    "relay denied: agent is not paired with user"
                );
                return Vec::new();
            }
            tracing::debug!(agent_id = sender_id, user_id, "relay agent -> user");
            return self
                .notify(
                    user_id,
                    ServerMessage::Message {
                        content: content.to_string(),
                        user_id: None,
                    },
                )
                .into_iter()
                .collect();
        }

        match self.pairings.get(sender_id) {
            Some(agent_id) => {
                tracing::debug!(user_id = sender_id, %agent_id, "relay user -> agent");
                self.notify(
                    agent_id,
                    ServerMessage::Message {
                        content: content.to_string(),
                        user_id: Some(sender_id.to_string()),
                    },
                )
                .into_iter()
                .collect()
            }
            None => {
                tracing::debug!(user_id = sender_id, "relay from unpaired user ignored");
                Vec::new()
            }
        }
    }

    /// Send the full wait queue to every connected agent.
    pub fn broadcast_queue(&self) -> Vec<Effect> {
        let queue = self.queue.snapshot();
        let mut agents: Vec<&String> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.role == Role::Agent)
            .map(|(id, _)| id)
            .collect();
        agents.sort();
        agents
            .into_iter()
            .map(|agent_id| Effect::Send {
                to: agent_id.clone(),
                message: ServerMessage::QueueUpdate {
                    queue: queue.clone(),
                },
            })
            .collect()
    }

    pub fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot {
            queue: self.queue.snapshot(),
            active_chats: self.pairings.clone(),
        }
    }

    fn notify(&self, client_id: &str, message: ServerMessage) -> Option<Effect> {
        self.connections.contains_key(client_id).then(|| Effect::Send {
            to: client_id.to_string(),
            message,
        })
    }
}
