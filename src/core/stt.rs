//! Transcription collaborator contract.
//!
//! The core never inspects audio itself; it hands capture-channel bytes to a
//! [`SpeechToText`] implementation and acts on the resolved
//! [`TranscribeOutcome`]. The tagged outcome is decided exactly once at this
//! boundary and never re-inspected deeper in the core.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum SttError {
    /// The transcription engine rejected or failed to process the audio
    #[error("Transcription failed: {0}")]
    Engine(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for transcription operations.
pub type SttResult<T> = Result<T, SttError>;

/// Resolution of one capture-audio submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscribeOutcome {
    /// The audio resolved to text.
    Transcript(String),
    /// The engine cannot transcribe server-side; the client should perform
    /// local capture and submit the transcript directly.
    NeedsClientCapture,
}

/// Black-box transcription contract.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: Bytes) -> SttResult<TranscribeOutcome>;
}

/// Structured transcript payload a capture client may embed in the audio
/// channel instead of raw samples.
#[derive(Debug, Deserialize)]
struct TranscriptPayload {
    transcript: String,
}

/// Default transcriber: no server-side recognition engine.
///
/// Capture clients that already ran local recognition send the transcript as
/// a JSON payload on the audio channel; anything else is raw audio this
/// transcriber cannot handle, so it asks for client-side capture.
#[derive(Debug, Default)]
pub struct EmbeddedTranscriptStt;

#[async_trait]
impl SpeechToText for EmbeddedTranscriptStt {
    async fn transcribe(&self, audio: Bytes) -> SttResult<TranscribeOutcome> {
        match serde_json::from_slice::<TranscriptPayload>(&audio) {
            Ok(payload) if !payload.transcript.trim().is_empty() => {
                debug!(
                    "received embedded transcript ({} bytes)",
                    payload.transcript.len()
                );
                Ok(TranscribeOutcome::Transcript(payload.transcript))
            }
            Ok(_) => Ok(TranscribeOutcome::NeedsClientCapture),
            Err(_) => {
                // Raw audio bytes; nothing to decode them with server-side.
                debug!("audio payload is not a transcript, requesting client capture");
                Ok(TranscribeOutcome::NeedsClientCapture)
            }
        }
    }
}
