//! Conversational capture channel: WebSocket handler and wire protocol.

pub mod handler;
pub mod messages;

pub use handler::session_handler;
pub use messages::{
    SessionIncomingMessage, SessionMessageRoute, SessionOutgoingMessage, SessionValidationError,
    MAX_TRANSCRIPT_SIZE,
};
