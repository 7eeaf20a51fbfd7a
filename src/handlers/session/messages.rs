//! Session WebSocket message types.
//!
//! Defines the wire protocol for the conversational capture channel. Binary
//! frames carry capture audio (inbound) and synthesized audio (outbound);
//! everything else is a tagged JSON text message. Payload shapes are resolved
//! here, once, at the boundary; the core never re-inspects them.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::core::tts::VoiceOptions;

/// Maximum allowed size for a submitted transcript (50 KB)
pub const MAX_TRANSCRIPT_SIZE: usize = 50 * 1024;

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Incoming WebSocket messages from the capture client
#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum SessionIncomingMessage {
    /// Direct transcript submission (capture ran fully client-side)
    #[serde(rename = "capture_result")]
    CaptureResult {
        /// Transcribed text
        transcript: String,
    },

    /// Arm a capture phase
    #[serde(rename = "capture_start")]
    CaptureStart,

    /// The client finished playing the assistant reply
    #[serde(rename = "playback_ended")]
    PlaybackEnded,
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Outgoing WebSocket messages to the capture client
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum SessionOutgoingMessage {
    /// Session established; first message after the upgrade
    #[serde(rename = "session_created")]
    SessionCreated {
        /// Session ID
        session_id: String,
    },

    /// What was heard from the user and/or what the assistant replied
    #[serde(rename = "utterance_echo")]
    UtteranceEcho {
        #[serde(skip_serializing_if = "Option::is_none")]
        user: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        assistant: Option<String>,
    },

    /// The client should synthesize and play the text locally
    #[serde(rename = "synthesis_request")]
    SynthesisRequest {
        /// Text to speak
        text: String,
        /// Voice parameters for local synthesis
        voice: VoiceOptions,
    },

    /// The client should begin local capture
    #[serde(rename = "capture_request")]
    CaptureRequest,

    /// Error message
    #[serde(rename = "error")]
    Error {
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Error message
        message: String,
    },

    /// Connection closing
    #[serde(rename = "closing")]
    Closing {
        /// Reason for closing
        reason: String,
    },
}

// =============================================================================
// Message Routing
// =============================================================================

/// Message routing for the per-connection sender task
pub enum SessionMessageRoute {
    /// JSON text message
    Outgoing(SessionOutgoingMessage),
    /// Binary synthesized audio
    Audio(Bytes),
    /// Close connection
    Close,
}

// =============================================================================
// Validation
// =============================================================================

/// Error type for message validation failures
#[derive(Debug, Clone)]
pub enum SessionValidationError {
    /// Transcript exceeds maximum allowed size
    TranscriptTooLarge { size: usize, max: usize },
}

impl std::fmt::Display for SessionValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TranscriptTooLarge { size, max } => {
                write!(f, "Transcript too large: {} bytes (max: {} bytes)", size, max)
            }
        }
    }
}

impl std::error::Error for SessionValidationError {}

impl SessionIncomingMessage {
    /// Validates message field sizes to prevent resource exhaustion attacks.
    pub fn validate_size(&self) -> Result<(), SessionValidationError> {
        match self {
            SessionIncomingMessage::CaptureResult { transcript } => {
                let size = transcript.len();
                if size > MAX_TRANSCRIPT_SIZE {
                    return Err(SessionValidationError::TranscriptTooLarge {
                        size,
                        max: MAX_TRANSCRIPT_SIZE,
                    });
                }
            }
            // No user-provided content to bound.
            SessionIncomingMessage::CaptureStart | SessionIncomingMessage::PlaybackEnded => {}
        }
        Ok(())
    }
}
