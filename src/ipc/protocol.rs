//! Wire protocol message types for the live-chat WebSocket.
//!
//! All messages are JSON objects carrying a `type` field. Inbound
//! messages are [`ClientMessage`], outbound are [`ServerMessage`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Messages sent by users and agents.
///
/// Fields the broker needs are optional at decode time: a message with
/// a missing target is still a known message, and the broker ignores it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RequestChat,

    AcceptChat {
        #[serde(default)]
        user_id: Option<String>,
    },

    EndChat {
        #[serde(default)]
        user_id: Option<String>,
    },

    Message {
        #[serde(default)]
        content: Option<String>,
        /// Target user. Only meaningful when the sender is an agent.
        #[serde(default)]
        user_id: Option<String>,
    },
}

/// Messages pushed by the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full wait queue, oldest first. Sent to every agent.
    QueueUpdate { queue: Vec<String> },

    ChatStarted,

    ChatAccepted { user_id: String },

    ChatEnded,

    ChatEndedConfirmation { user_id: String },

    Message {
        content: String,
        /// Originating user, present only when the recipient is an agent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

/// Party role, taken from the connection path tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "agent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path tag that is neither `user` nor `agent`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported client type: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "agent" => Ok(Role::Agent),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// WebSocket close dispositions used by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    /// Prior connection replaced by a newer one with the same client id.
    GoingAway,
    /// Unrecognized role tag on the connection path.
    UnsupportedData,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::UnsupportedData => 1003,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            CloseCode::Normal => "normal closure",
            CloseCode::GoingAway => "superseded by a newer connection",
            CloseCode::UnsupportedData => "unsupported client type",
        }
    }
}

/// Minimal envelope for extracting `type` from messages that do not
/// match any [`ClientMessage`] variant.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
}
