//! Message dispatch — maps decoded client messages to broker operations.
//!
//! Pure logic, no I/O. The sender's role is the one it connected with;
//! messages its role may not send are dropped here.

use crate::ipc::protocol::{ClientMessage, Role};

use super::state::{BrokerState, Effect};

/// Dispatch one inbound message from `client_id`.
///
/// | type           | role  | operation                |
/// |----------------|-------|--------------------------|
/// | `request_chat` | user  | enqueue                  |
/// | `accept_chat`  | agent | accept pairing           |
/// | `end_chat`     | agent | terminate pairing        |
/// | `message`      | any   | relay                    |
pub fn handle_message(
    state: &mut BrokerState,
    client_id: &str,
    role: Role,
    message: ClientMessage,
) -> Vec<Effect> {
    match (message, role) {
        (ClientMessage::RequestChat, Role::User) => state.enqueue(client_id),
        (ClientMessage::AcceptChat { user_id }, Role::Agent) => match user_id {
            Some(user_id) => state.accept_pairing(client_id, &user_id),
            None => Vec::new(),
        },
        (ClientMessage::EndChat { user_id }, Role::Agent) => match user_id {
            Some(user_id) => state.terminate_pairing(&user_id, true, true),
            None => Vec::new(),
        },
        (ClientMessage::Message { content, user_id }, _) => {
            state.relay(client_id, content.as_deref(), user_id.as_deref())
        }
        (other, role) => {
            tracing::debug!(client_id, %role, message = ?other, "message not permitted for role");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::state::ConnectionId;
    use crate::ipc::protocol::ServerMessage;

    fn setup() -> BrokerState {
        let mut s = BrokerState::new();
        s.register("A1", Role::Agent, ConnectionId::new());
        s.register("U1", Role::User, ConnectionId::new());
        s
    }

    #[test]
    fn user_request_chat_enqueues() {
        let mut s = setup();
        let effects = handle_message(&mut s, "U1", Role::User, ClientMessage::RequestChat);
        assert_eq!(effects.len(), 1);
        assert_eq!(s.snapshot().queue, vec!["U1"]);
    }

    #[test]
    fn agent_request_chat_is_dropped() {
        let mut s = setup();
        assert!(handle_message(&mut s, "A1", Role::Agent, ClientMessage::RequestChat).is_empty());
        assert!(s.snapshot().queue.is_empty());
    }

    #[test]
    fn user_cannot_accept() {
        let mut s = setup();
        handle_message(&mut s, "U1", Role::User, ClientMessage::RequestChat);
        let effects = handle_message(
            &mut s,
            "U1",
            Role::User,
            ClientMessage::AcceptChat {
                user_id: Some("U1".into()),
            },
        );
        assert!(effects.is_empty());
        assert!(s.snapshot().active_chats.is_empty());
    }

    #[test]
    fn accept_without_user_id_is_dropped() {
        let mut s = setup();
        handle_message(&mut s, "U1", Role::User, ClientMessage::RequestChat);
        let effects = handle_message(
            &mut s,
            "A1",
            Role::Agent,
            ClientMessage::AcceptChat { user_id: None },
        );
        assert!(effects.is_empty());
        assert_eq!(s.snapshot().queue, vec!["U1"]);
    }

    #[test]
    fn agent_accept_then_end() {
        let mut s = setup();
        handle_message(&mut s, "U1", Role::User, ClientMessage::RequestChat);
        handle_message(
            &mut s,
            "A1",
            Role::Agent,
            ClientMessage::AcceptChat {
                user_id: Some("U1".into()),
            },
        );
        assert_eq!(s.snapshot().active_chats.len(), 1);

        let effects = handle_message(
            &mut s,
            "A1",
            Role::Agent,
            ClientMessage::EndChat {
                user_id: Some("U1".into()),
            },
        );
        assert_eq!(
            effects,
            vec![
                Effect::Send {
                    to: "U1".into(),
                    message: ServerMessage::ChatEnded,
                },
                Effect::Send {
                    to: "A1".into(),
                    message: ServerMessage::ChatEndedConfirmation {
                        user_id: "U1".into()
                    },
                },
            ]
        );
    }

    #[test]
    fn user_cannot_end_chat() {
        let mut s = setup();
        handle_message(&mut s, "U1", Role::User, ClientMessage::RequestChat);
        s.accept_pairing("A1", "U1");
        let effects = handle_message(
            &mut s,
            "U1",
            Role::User,
            ClientMessage::EndChat {
                user_id: Some("U1".into()),
            },
        );
        assert!(effects.is_empty());
        assert_eq!(s.snapshot().active_chats.len(), 1);
    }
}
