//! Application state: the single composition root.
//!
//! Every service the handlers need hangs off one [`AppState`] threaded
//! through axum; no ambient globals anywhere.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::core::broadcast::AnimationBroadcastService;
use crate::core::frames::FrameLibrary;
use crate::core::orchestrator::TurnOrchestrator;
use crate::core::reply::{ReplyGenerator, RuleReplyGenerator};
use crate::core::session::SessionRegistry;
use crate::core::stt::{EmbeddedTranscriptStt, SpeechToText};
use crate::core::tts::{ClientPlaybackSynthesizer, SpeechSynthesizer};

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    pub orchestrator: Arc<TurnOrchestrator>,
    pub broadcast: Arc<AnimationBroadcastService>,
    pub stt: Arc<dyn SpeechToText>,
    /// Where the viewer listener actually bound (it may have hunted past the
    /// configured port).
    pub viewer_addr: SocketAddr,
}

impl AppState {
    /// Build the state with the built-in collaborators.
    pub fn new(config: ServerConfig, viewer_addr: SocketAddr) -> Arc<Self> {
        let replies: Arc<dyn ReplyGenerator> = Arc::new(RuleReplyGenerator::default());
        let synthesizer: Arc<dyn SpeechSynthesizer> =
            Arc::new(ClientPlaybackSynthesizer::new(config.voice.clone()));
        let stt: Arc<dyn SpeechToText> = Arc::new(EmbeddedTranscriptStt);
        Self::with_collaborators(config, viewer_addr, replies, synthesizer, stt)
    }

    /// Build the state with explicit collaborators (used by tests and by
    /// deployments wiring in real engines).
    pub fn with_collaborators(
        config: ServerConfig,
        viewer_addr: SocketAddr,
        replies: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        stt: Arc<dyn SpeechToText>,
    ) -> Arc<Self> {
        let frames = match &config.animations_dir {
            Some(dir) => {
                info!("loading avatar animations from {}", dir.display());
                FrameLibrary::load(dir)
            }
            None => FrameLibrary::builtin(),
        };
        let broadcast = Arc::new(AnimationBroadcastService::new(
            Arc::new(frames),
            config.frame_interval,
        ));
        let registry = Arc::new(SessionRegistry::new());
        let orchestrator = TurnOrchestrator::new(
            registry,
            Arc::clone(&broadcast),
            replies,
            synthesizer,
            config.turn_config(),
        );

        Arc::new(Self {
            config,
            orchestrator,
            broadcast,
            stt,
            viewer_addr,
        })
    }
}
