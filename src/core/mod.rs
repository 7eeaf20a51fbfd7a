//! Core turn-taking, capture-resilience, and broadcast machinery.

pub mod broadcast;
pub mod capture;
pub mod frames;
pub mod orchestrator;
pub mod reply;
pub mod session;
pub mod stt;
pub mod tts;

pub use broadcast::{
    AnimationBroadcastService, AvatarFrame, FrameSendError, FrameSink, Viewer, ViewerHandle,
    DEFAULT_FRAME_INTERVAL,
};
pub use capture::{
    CaptureControl, CaptureDirective, CaptureDriver, CaptureError, CaptureEvent, CaptureMode,
    CaptureResult, CaptureUpdate, RecognitionResilienceManager, Recognizer, RecognizerError,
    SegmentRecorder,
};
pub use frames::FrameLibrary;
pub use orchestrator::{
    CARETAKER_REPLY, OrchestratorError, OrchestratorResult, TurnConfig, TurnOrchestrator,
};
pub use reply::{ReplyError, ReplyGenerator, ReplyResult, RuleReplyGenerator};
pub use session::{
    AnimationState, Session, SessionEvent, SessionRegistry, SessionState,
};
pub use stt::{EmbeddedTranscriptStt, SpeechToText, SttError, SttResult, TranscribeOutcome};
pub use tts::{
    ClientPlaybackSynthesizer, PlaybackRequest, SpeechSynthesizer, SynthesisOutcome, TtsError,
    TtsResult, VoiceOptions,
};
