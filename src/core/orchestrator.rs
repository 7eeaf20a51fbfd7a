//! Turn-taking orchestration.
//!
//! For each session, exactly one utterance is processed end-to-end before the
//! next is accepted, and the broadcast avatar state always reflects the true
//! processing phase. Reply generation and synthesis are dispatched to
//! background tasks and re-enter the orchestrator as arbitrary-latency
//! callbacks; a per-session turn epoch makes "last message wins" explicit, so
//! a callback from a superseded or disconnected turn is dropped as an
//! ordering anomaly instead of corrupting state.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::broadcast::AnimationBroadcastService;
use crate::core::reply::ReplyGenerator;
use crate::core::session::{
    AnimationState, Session, SessionEvent, SessionRegistry, SessionState,
};
use crate::core::tts::{PlaybackRequest, SpeechSynthesizer, SynthesisOutcome, VoiceOptions};

/// Fixed apology substituted when reply generation fails or times out, so a
/// `Thinking` phase always ends in `Speaking` instead of hanging.
pub const CARETAKER_REPLY: &str = "Przepraszam, ale miałem problem z przetworzeniem \
     Twojej wypowiedzi. Czy możesz powtórzyć lub sformułować to inaczej?";

/// Errors returned to the transport gateway.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No session with the given id
    #[error("Unknown session: {0}")]
    UnknownSession(Uuid),

    /// A capture attempt is already outstanding
    #[error("Already capturing")]
    AlreadyCapturing,

    /// Capture can only be armed from idle
    #[error("Cannot start capture while {0:?}")]
    NotIdle(SessionState),
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Turn-taking behavior knobs.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Auto-arm the next capture phase after playback ends.
    pub continuous_mode: bool,
    /// Play a welcome utterance when a session is created.
    pub auto_greet: bool,
    pub greeting: String,
    /// How long the reply-generation collaborator may take before the
    /// caretaker reply takes over.
    pub reply_timeout: Duration,
    /// Upper bound on the `Speaking` phase when the client never reports
    /// playback end.
    pub speaking_grace: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            continuous_mode: true,
            auto_greet: true,
            greeting: "Witaj! Jak mogę Ci dzisiaj pomóc?".to_string(),
            reply_timeout: Duration::from_secs(10),
            speaking_grace: Duration::from_secs(30),
        }
    }
}

/// The server-resident turn state machine. One instance serves all sessions.
pub struct TurnOrchestrator {
    registry: Arc<SessionRegistry>,
    broadcast: Arc<AnimationBroadcastService>,
    replies: Arc<dyn ReplyGenerator>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    config: TurnConfig,
}

impl TurnOrchestrator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        broadcast: Arc<AnimationBroadcastService>,
        replies: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: TurnConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            broadcast,
            replies,
            synthesizer,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Create a session bound to the given event channel and, when
    /// configured, play the welcome utterance through the normal
    /// thinking -> speaking path.
    pub fn create_session(self: &Arc<Self>, events: mpsc::Sender<SessionEvent>) -> Arc<Session> {
        let session = self.registry.insert(events);
        info!(session_id = %session.id(), "session created ({} active)", self.registry.len());

        if self.config.auto_greet {
            let epoch = {
                let mut inner = session.lock();
                inner.state = SessionState::Thinking;
                inner.turn_epoch += 1;
                inner.turn_epoch
            };
            self.broadcast.set_state(AnimationState::Thinking);

            let this = Arc::clone(self);
            let id = session.id();
            let greeting = self.config.greeting.clone();
            tokio::spawn(async move {
                this.on_reply_ready(id, epoch, greeting);
            });
        }

        session
    }

    /// Accept a transcript for a session. Whitespace-only text is a no-op;
    /// a transcript arriving while a previous turn is still thinking or
    /// speaking is dropped (one outstanding utterance per session).
    pub fn on_transcript(self: &Arc<Self>, session_id: Uuid, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let Some(session) = self.registry.get(session_id) else {
            warn!(session_id = %session_id, "transcript for unknown session, dropped");
            return;
        };

        let epoch = {
            let mut inner = session.lock();
            match inner.state {
                SessionState::Idle | SessionState::Capturing => {}
                state => {
                    warn!(
                        session_id = %session_id,
                        "transcript while {:?}, dropped (one utterance at a time)", state
                    );
                    return;
                }
            }
            inner.pending_utterance = Some(text.to_string());
            inner.state = SessionState::Thinking;
            inner.turn_epoch += 1;
            inner.last_activity_at = std::time::Instant::now();
            inner.turn_epoch
        };

        debug!(session_id = %session_id, "transcript accepted: {:?}", text);
        self.broadcast.set_state(AnimationState::Thinking);
        session.emit(SessionEvent::UtteranceEcho {
            user: Some(text.to_string()),
            assistant: None,
        });

        // Reply generation runs in the background; on_reply_ready is the
        // resumption point, whenever (and from wherever) it arrives.
        let this = Arc::clone(self);
        let utterance = text.to_string();
        tokio::spawn(async move {
            let reply =
                match tokio::time::timeout(this.config.reply_timeout, this.replies.generate(&utterance))
                    .await
                {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => {
                        warn!(session_id = %session_id, "reply generation failed: {}", e);
                        CARETAKER_REPLY.to_string()
                    }
                    Err(_) => {
                        warn!(session_id = %session_id, "reply generation timed out");
                        CARETAKER_REPLY.to_string()
                    }
                };
            this.on_reply_ready(session_id, epoch, reply);
        });
    }

    /// A generated reply arrived. Only valid while the session is still
    /// thinking about the same turn; anything else is an ordering anomaly.
    pub fn on_reply_ready(self: &Arc<Self>, session_id: Uuid, epoch: u64, reply: String) {
        let Some(session) = self.registry.get(session_id) else {
            debug!(session_id = %session_id, "reply for departed session, dropped");
            return;
        };

        {
            let mut inner = session.lock();
            if inner.state != SessionState::Thinking {
                warn!(
                    session_id = %session_id,
                    "reply while {:?}, dropped as ordering anomaly", inner.state
                );
                return;
            }
            if inner.turn_epoch != epoch {
                warn!(
                    session_id = %session_id,
                    "reply for superseded turn {} (current {}), dropped", epoch, inner.turn_epoch
                );
                return;
            }
            inner.state = SessionState::Speaking;
            inner.pending_utterance = None;
            inner.last_activity_at = std::time::Instant::now();
        }

        self.broadcast.set_state(AnimationState::Talking);
        session.emit(SessionEvent::UtteranceEcho {
            user: None,
            assistant: Some(reply.clone()),
        });

        let this = Arc::clone(self);
        let synth_session = Arc::clone(&session);
        tokio::spawn(async move {
            match this.synthesizer.synthesize(&reply).await {
                Ok(SynthesisOutcome::Audio(audio)) => {
                    synth_session.emit(SessionEvent::SynthesisAudio(audio));
                }
                Ok(SynthesisOutcome::ClientPlayback(request)) => {
                    synth_session.emit(SessionEvent::SynthesisRequest(request));
                }
                Err(e) => {
                    // Degrade to client-side playback so the turn still ends.
                    warn!(session_id = %session_id, "synthesis failed: {}", e);
                    synth_session.emit(SessionEvent::SynthesisRequest(PlaybackRequest {
                        text: reply,
                        voice: VoiceOptions::default(),
                    }));
                }
            }
        });

        // Safety net: a client that never reports playback end would pin the
        // session in Speaking forever.
        let this = Arc::clone(self);
        let grace = self.config.speaking_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            this.end_speaking_if_stuck(session_id, epoch);
        });
    }

    /// The client finished playing the reply.
    pub fn on_playback_ended(&self, session_id: Uuid) {
        let Some(session) = self.registry.get(session_id) else {
            debug!(session_id = %session_id, "playback end for departed session, dropped");
            return;
        };

        let mut inner = session.lock();
        if inner.state != SessionState::Speaking {
            warn!(
                session_id = %session_id,
                "playback end while {:?}, dropped as ordering anomaly", inner.state
            );
            return;
        }
        self.finish_speaking(&session, &mut inner);
    }

    /// Arm a capture phase. Duplicate requests while one is outstanding are
    /// rejected without side effects.
    pub fn on_capture_start(&self, session_id: Uuid) -> OrchestratorResult<()> {
        let session = self
            .registry
            .get(session_id)
            .ok_or(OrchestratorError::UnknownSession(session_id))?;

        let mut inner = session.lock();
        match inner.state {
            SessionState::Capturing => Err(OrchestratorError::AlreadyCapturing),
            SessionState::Thinking | SessionState::Speaking => {
                Err(OrchestratorError::NotIdle(inner.state))
            }
            SessionState::Idle => {
                inner.state = SessionState::Capturing;
                inner.last_activity_at = std::time::Instant::now();
                drop(inner);
                self.broadcast.set_state(AnimationState::Listening);
                session.emit(SessionEvent::CaptureRequest);
                Ok(())
            }
        }
    }

    /// Tear a session down. Idempotent; any in-flight reply or synthesis for
    /// it will find no session and be dropped.
    pub fn on_disconnect(&self, session_id: Uuid) {
        if self.registry.remove(session_id).is_some() {
            info!(session_id = %session_id, "session destroyed ({} remain)", self.registry.len());
            self.broadcast.set_state(AnimationState::Idle);
        } else {
            debug!(session_id = %session_id, "disconnect for unknown session, ignored");
        }
    }

    fn end_speaking_if_stuck(&self, session_id: Uuid, epoch: u64) {
        let Some(session) = self.registry.get(session_id) else {
            return;
        };
        let mut inner = session.lock();
        if inner.state == SessionState::Speaking && inner.turn_epoch == epoch {
            debug!(session_id = %session_id, "speaking grace elapsed, forcing turn end");
            self.finish_speaking(&session, &mut inner);
        }
    }

    /// Speaking -> Idle, or straight to the next capture phase in continuous
    /// mode. Caller holds the session lock.
    fn finish_speaking(
        &self,
        session: &Arc<Session>,
        inner: &mut parking_lot::MutexGuard<'_, crate::core::session::SessionInner>,
    ) {
        inner.last_activity_at = std::time::Instant::now();
        if self.config.continuous_mode {
            inner.state = SessionState::Capturing;
            self.broadcast.set_state(AnimationState::Listening);
            session.emit(SessionEvent::CaptureRequest);
        } else {
            inner.state = SessionState::Idle;
            self.broadcast.set_state(AnimationState::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::broadcast::DEFAULT_FRAME_INTERVAL;
    use crate::core::frames::FrameLibrary;
    use crate::core::reply::{ReplyError, ReplyResult, RuleReplyGenerator};
    use crate::core::tts::{ClientPlaybackSynthesizer, TtsResult};
    use async_trait::async_trait;
    use bytes::Bytes;

    struct SlowReply(Duration);

    #[async_trait]
    impl ReplyGenerator for SlowReply {
        async fn generate(&self, text: &str) -> ReplyResult<String> {
            tokio::time::sleep(self.0).await;
            Ok(format!("echo: {text}"))
        }
    }

    struct FailingReply;

    #[async_trait]
    impl ReplyGenerator for FailingReply {
        async fn generate(&self, _text: &str) -> ReplyResult<String> {
            Err(ReplyError::Backend("model unreachable".to_string()))
        }
    }

    struct AudioSynthesizer;

    #[async_trait]
    impl SpeechSynthesizer for AudioSynthesizer {
        async fn synthesize(&self, _text: &str) -> TtsResult<SynthesisOutcome> {
            Ok(SynthesisOutcome::Audio(Bytes::from_static(b"wav")))
        }
    }

    struct Harness {
        orchestrator: Arc<TurnOrchestrator>,
        broadcast: Arc<AnimationBroadcastService>,
        session: Arc<Session>,
        events: mpsc::Receiver<SessionEvent>,
    }

    fn harness_with(
        replies: Arc<dyn ReplyGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: TurnConfig,
    ) -> Harness {
        let registry = Arc::new(SessionRegistry::new());
        let broadcast = Arc::new(AnimationBroadcastService::new(
            Arc::new(FrameLibrary::builtin()),
            DEFAULT_FRAME_INTERVAL,
        ));
        let orchestrator = TurnOrchestrator::new(
            registry,
            Arc::clone(&broadcast),
            replies,
            synthesizer,
            config,
        );
        let (tx, rx) = mpsc::channel(32);
        let session = orchestrator.create_session(tx);
        Harness {
            orchestrator,
            broadcast,
            session,
            events: rx,
        }
    }

    fn quiet_config() -> TurnConfig {
        TurnConfig {
            continuous_mode: false,
            auto_greet: false,
            reply_timeout: Duration::from_millis(200),
            speaking_grace: Duration::from_secs(30),
            ..Default::default()
        }
    }

    fn harness(config: TurnConfig) -> Harness {
        harness_with(
            Arc::new(RuleReplyGenerator::with_latency(Duration::ZERO)),
            Arc::new(ClientPlaybackSynthesizer::default()),
            config,
        )
    }

    async fn wait_for_state(session: &Arc<Session>, expected: SessionState) {
        for _ in 0..100 {
            if session.state() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "session never reached {:?} (still {:?})",
            expected,
            session.state()
        );
    }

    async fn next_event(events: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("Should receive an event in time")
            .expect("Event channel should be open")
    }

    #[tokio::test]
    async fn test_full_cycle_ends_idle() {
        let mut h = harness(quiet_config());
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "Cześć");
        assert_eq!(h.session.state(), SessionState::Thinking);
        assert_eq!(h.broadcast.current_state(), AnimationState::Thinking);

        match next_event(&mut h.events).await {
            SessionEvent::UtteranceEcho { user, assistant } => {
                assert_eq!(user.as_deref(), Some("Cześć"));
                assert!(assistant.is_none());
            }
            other => panic!("Expected user echo, got {other:?}"),
        }

        wait_for_state(&h.session, SessionState::Speaking).await;
        assert_eq!(h.broadcast.current_state(), AnimationState::Talking);

        match next_event(&mut h.events).await {
            SessionEvent::UtteranceEcho { assistant, .. } => {
                assert_eq!(assistant.as_deref(), Some("Cześć! Jak mogę Ci dzisiaj pomóc?"));
            }
            other => panic!("Expected assistant echo, got {other:?}"),
        }
        match next_event(&mut h.events).await {
            SessionEvent::SynthesisRequest(request) => {
                assert_eq!(request.text, "Cześć! Jak mogę Ci dzisiaj pomóc?");
            }
            other => panic!("Expected synthesis request, got {other:?}"),
        }

        h.orchestrator.on_playback_ended(id);
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.broadcast.current_state(), AnimationState::Idle);
    }

    #[tokio::test]
    async fn test_continuous_mode_rearms_capture() {
        let mut h = harness(TurnConfig {
            continuous_mode: true,
            ..quiet_config()
        });
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "Hej");
        wait_for_state(&h.session, SessionState::Speaking).await;
        // Drain user echo, assistant echo, synthesis request.
        for _ in 0..3 {
            next_event(&mut h.events).await;
        }

        h.orchestrator.on_playback_ended(id);
        assert_eq!(h.session.state(), SessionState::Capturing);
        assert_eq!(h.broadcast.current_state(), AnimationState::Listening);
        assert!(matches!(
            next_event(&mut h.events).await,
            SessionEvent::CaptureRequest
        ));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_a_noop() {
        let h = harness(quiet_config());
        h.orchestrator.on_transcript(h.session.id(), "   \n ");
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.broadcast.current_state(), AnimationState::Idle);
    }

    #[tokio::test]
    async fn test_reply_in_wrong_state_is_dropped() {
        let h = harness(quiet_config());
        let id = h.session.id();

        h.orchestrator
            .on_reply_ready(id, 1, "spurious".to_string());
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.broadcast.current_state(), AnimationState::Idle);
    }

    #[tokio::test]
    async fn test_stale_epoch_reply_is_dropped() {
        let h = harness_with(
            Arc::new(SlowReply(Duration::from_secs(5))),
            Arc::new(ClientPlaybackSynthesizer::default()),
            TurnConfig {
                reply_timeout: Duration::from_secs(10),
                ..quiet_config()
            },
        );
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "pierwsze");
        assert_eq!(h.session.state(), SessionState::Thinking);

        // A reply carrying an old epoch must not advance the turn.
        h.orchestrator.on_reply_ready(id, 0, "stale".to_string());
        assert_eq!(h.session.state(), SessionState::Thinking);
    }

    #[tokio::test]
    async fn test_timeout_produces_caretaker_reply() {
        let mut h = harness_with(
            Arc::new(SlowReply(Duration::from_secs(60))),
            Arc::new(ClientPlaybackSynthesizer::default()),
            TurnConfig {
                reply_timeout: Duration::from_millis(20),
                ..quiet_config()
            },
        );
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "Cześć");
        next_event(&mut h.events).await; // user echo

        wait_for_state(&h.session, SessionState::Speaking).await;
        match next_event(&mut h.events).await {
            SessionEvent::UtteranceEcho { assistant, .. } => {
                assert_eq!(assistant.as_deref(), Some(CARETAKER_REPLY));
            }
            other => panic!("Expected caretaker echo, got {other:?}"),
        }

        h.orchestrator.on_playback_ended(id);
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_generator_error_produces_caretaker_reply() {
        let mut h = harness_with(
            Arc::new(FailingReply),
            Arc::new(ClientPlaybackSynthesizer::default()),
            quiet_config(),
        );
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "halo");
        next_event(&mut h.events).await; // user echo

        wait_for_state(&h.session, SessionState::Speaking).await;
        match next_event(&mut h.events).await {
            SessionEvent::UtteranceEcho { assistant, .. } => {
                assert_eq!(assistant.as_deref(), Some(CARETAKER_REPLY));
            }
            other => panic!("Expected caretaker echo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_capture_start_rejected() {
        let h = harness(quiet_config());
        let id = h.session.id();

        h.orchestrator.on_capture_start(id).expect("First should arm");
        assert_eq!(h.session.state(), SessionState::Capturing);
        assert_eq!(h.broadcast.current_state(), AnimationState::Listening);

        let err = h.orchestrator.on_capture_start(id).expect_err("Should reject");
        assert!(matches!(err, OrchestratorError::AlreadyCapturing));
        assert_eq!(h.session.state(), SessionState::Capturing);
    }

    #[tokio::test]
    async fn test_transcript_while_thinking_is_dropped() {
        let h = harness_with(
            Arc::new(SlowReply(Duration::from_secs(5))),
            Arc::new(ClientPlaybackSynthesizer::default()),
            TurnConfig {
                reply_timeout: Duration::from_secs(10),
                ..quiet_config()
            },
        );
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "pierwsze");
        h.orchestrator.on_transcript(id, "drugie");
        // Still thinking about the first; the second never started a turn.
        assert_eq!(h.session.state(), SessionState::Thinking);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_inflight_reply() {
        let h = harness_with(
            Arc::new(SlowReply(Duration::from_millis(30))),
            Arc::new(ClientPlaybackSynthesizer::default()),
            quiet_config(),
        );
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "zaraz wracam");
        h.orchestrator.on_disconnect(id);
        assert!(h.orchestrator.registry().get(id).is_none());
        assert_eq!(h.broadcast.current_state(), AnimationState::Idle);

        // The late reply finds no session and must not resurrect state.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(h.broadcast.current_state(), AnimationState::Idle);

        // Disconnect is idempotent.
        h.orchestrator.on_disconnect(id);
    }

    #[tokio::test]
    async fn test_playback_ended_when_idle_is_anomaly() {
        let h = harness(quiet_config());
        h.orchestrator.on_playback_ended(h.session.id());
        assert_eq!(h.session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_greeting_plays_on_session_create() {
        let mut h = harness(TurnConfig {
            auto_greet: true,
            greeting: "Witaj w domu".to_string(),
            ..quiet_config()
        });

        wait_for_state(&h.session, SessionState::Speaking).await;
        match next_event(&mut h.events).await {
            SessionEvent::UtteranceEcho { assistant, user } => {
                assert_eq!(assistant.as_deref(), Some("Witaj w domu"));
                assert!(user.is_none());
            }
            other => panic!("Expected greeting echo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_audio_synthesis_flows_to_session() {
        let mut h = harness_with(
            Arc::new(RuleReplyGenerator::with_latency(Duration::ZERO)),
            Arc::new(AudioSynthesizer),
            quiet_config(),
        );
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "Cześć");
        next_event(&mut h.events).await; // user echo
        wait_for_state(&h.session, SessionState::Speaking).await;
        next_event(&mut h.events).await; // assistant echo

        match next_event(&mut h.events).await {
            SessionEvent::SynthesisAudio(audio) => assert_eq!(&audio[..], b"wav"),
            other => panic!("Expected synthesis audio, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_speaking_grace_forces_turn_end() {
        let h = harness(TurnConfig {
            speaking_grace: Duration::from_millis(30),
            ..quiet_config()
        });
        let id = h.session.id();

        h.orchestrator.on_transcript(id, "Hej");
        wait_for_state(&h.session, SessionState::Speaking).await;

        // No playback_ended ever arrives; the grace timer ends the turn.
        wait_for_state(&h.session, SessionState::Idle).await;
        assert_eq!(h.broadcast.current_state(), AnimationState::Idle);
    }
}
