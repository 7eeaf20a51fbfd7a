//! Speech-synthesis collaborator contract.
//!
//! Synthesis resolves to either audio bytes the server streams down the
//! session channel, or a playback request the client fulfills with its own
//! local voices. The orchestrator dispatches whichever arm comes back and
//! never looks inside the payload.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during synthesis.
#[derive(Debug, Error)]
pub enum TtsError {
    /// The synthesis engine failed to produce audio
    #[error("Synthesis failed: {0}")]
    Engine(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for synthesis operations.
pub type TtsResult<T> = Result<T, TtsError>;

/// Voice parameters for client-side playback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceOptions {
    /// BCP-47 language tag for voice selection
    pub lang: String,
    /// Playback volume, 0.0 to 1.0
    pub volume: f32,
    /// Speaking rate multiplier
    pub rate: f32,
    /// Voice pitch multiplier
    pub pitch: f32,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            lang: "pl-PL".to_string(),
            volume: 1.0,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Instruction for the client to synthesize and play text locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackRequest {
    pub text: String,
    pub voice: VoiceOptions,
}

/// Resolution of one synthesis dispatch.
#[derive(Debug)]
pub enum SynthesisOutcome {
    /// Audio bytes ready for playback on the client.
    Audio(Bytes),
    /// The engine cannot produce audio server-side; the client should
    /// perform local synthesis with the given voice options.
    ClientPlayback(PlaybackRequest),
}

/// Black-box synthesis contract.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> TtsResult<SynthesisOutcome>;
}

/// Default synthesizer: no server-side voice model, delegate playback to the
/// client's local speech synthesis with configured voice options.
#[derive(Debug, Default)]
pub struct ClientPlaybackSynthesizer {
    voice: VoiceOptions,
}

impl ClientPlaybackSynthesizer {
    pub fn new(voice: VoiceOptions) -> Self {
        Self { voice }
    }
}

#[async_trait]
impl SpeechSynthesizer for ClientPlaybackSynthesizer {
    async fn synthesize(&self, text: &str) -> TtsResult<SynthesisOutcome> {
        if text.trim().is_empty() {
            return Err(TtsError::Engine("nothing to synthesize".to_string()));
        }
        Ok(SynthesisOutcome::ClientPlayback(PlaybackRequest {
            text: text.to_string(),
            voice: self.voice.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_client_playback_carries_voice_options() {
        let voice = VoiceOptions {
            lang: "pl-PL".to_string(),
            volume: 0.8,
            rate: 1.1,
            pitch: 0.9,
        };
        let synthesizer = ClientPlaybackSynthesizer::new(voice.clone());

        let outcome = synthesizer
            .synthesize("Dzień dobry")
            .await
            .expect("Should synthesize");
        match outcome {
            SynthesisOutcome::ClientPlayback(request) => {
                assert_eq!(request.text, "Dzień dobry");
                assert_eq!(request.voice, voice);
            }
            SynthesisOutcome::Audio(_) => panic!("Expected ClientPlayback outcome"),
        }
    }

    #[tokio::test]
    async fn test_empty_text_is_an_error() {
        let synthesizer = ClientPlaybackSynthesizer::default();
        assert!(synthesizer.synthesize("  ").await.is_err());
    }

    #[test]
    fn test_playback_request_serialization() {
        let request = PlaybackRequest {
            text: "Witaj".to_string(),
            voice: VoiceOptions::default(),
        };
        let json = serde_json::to_string(&request).expect("Should serialize");
        assert!(json.contains(r#""text":"Witaj""#));
        assert!(json.contains(r#""lang":"pl-PL""#));
    }
}
