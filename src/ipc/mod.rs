//! Live-chat wire protocol — JSON messages over WebSocket text frames.

pub mod codec;
pub mod protocol;
