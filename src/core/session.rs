//! Per-session conversational state and the concurrent session registry.
//!
//! A [`Session`] is created when a capture-channel client connects and
//! destroyed on disconnect; it is never persisted. All turn-taking state for
//! one conversation lives behind a single mutex so every transition is a
//! one-field read-modify-write; no multi-step locking anywhere in the core.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::tts::PlaybackRequest;

/// Turn-taking phase of a session. Exactly one holds at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No utterance in flight; a new transcript is accepted.
    Idle,
    /// A capture attempt is outstanding on the client.
    Capturing,
    /// Transcript accepted, reply generation in flight.
    Thinking,
    /// Reply handed to synthesis, playback not yet finished.
    Speaking,
}

/// Avatar animation state broadcast to viewers, derived from [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationState {
    Idle,
    Listening,
    Thinking,
    Talking,
}

impl AnimationState {
    /// All states, in a stable order (used for frame-library loading).
    pub const ALL: [AnimationState; 4] = [
        AnimationState::Idle,
        AnimationState::Listening,
        AnimationState::Thinking,
        AnimationState::Talking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnimationState::Idle => "idle",
            AnimationState::Listening => "listening",
            AnimationState::Thinking => "thinking",
            AnimationState::Talking => "talking",
        }
    }
}

impl std::fmt::Display for AnimationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SessionState {
    /// The avatar state that reflects this processing phase.
    pub fn avatar_state(&self) -> AnimationState {
        match self {
            SessionState::Idle => AnimationState::Idle,
            SessionState::Capturing => AnimationState::Listening,
            SessionState::Thinking => AnimationState::Thinking,
            SessionState::Speaking => AnimationState::Talking,
        }
    }
}

/// Events the orchestrator emits toward one session's client connection.
///
/// The transport gateway owns the other end of the channel and translates
/// these into wire messages; the core never touches WebSocket types.
#[derive(Debug)]
pub enum SessionEvent {
    /// What was heard from the user and/or what the assistant replied.
    UtteranceEcho {
        user: Option<String>,
        assistant: Option<String>,
    },
    /// Synthesized audio ready for client playback.
    SynthesisAudio(Bytes),
    /// The client should synthesize and play the text locally.
    SynthesisRequest(PlaybackRequest),
    /// The client should begin local capture.
    CaptureRequest,
}

/// Mutable turn-taking state, guarded by the session mutex.
#[derive(Debug)]
pub(crate) struct SessionInner {
    pub state: SessionState,
    /// In-flight transcript awaiting its reply. Set when a transcript is
    /// accepted, cleared when the reply lands, so a session never holds two
    /// concurrent outstanding replies.
    pub pending_utterance: Option<String>,
    /// Identifies which turn an async callback belongs to. Bumped on every
    /// transition into `Thinking`; callbacks carrying a stale epoch are
    /// ordering anomalies and are dropped.
    pub turn_epoch: u64,
    pub last_activity_at: Instant,
}

/// One logical conversation, bound to one capture-channel connection.
pub struct Session {
    id: Uuid,
    events: mpsc::Sender<SessionEvent>,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub(crate) fn new(events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            events,
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                pending_utterance: None,
                turn_epoch: 0,
                last_activity_at: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Avatar state derived from the current phase; the single source of
    /// truth handed to the broadcast service.
    pub fn avatar_state(&self) -> AnimationState {
        self.state().avatar_state()
    }

    pub fn last_activity_at(&self) -> Instant {
        self.inner.lock().last_activity_at
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, SessionInner> {
        self.inner.lock()
    }

    /// Queue an event toward the client. A full or closed channel means the
    /// connection is going away; the event is dropped and teardown follows
    /// through the normal disconnect path.
    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Err(e) = self.events.try_send(event) {
            tracing::debug!(session_id = %self.id, "dropping session event: {}", e);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// Concurrent map of live sessions, keyed by session id.
///
/// Supports safe concurrent insert/remove/lookup; individual operations are
/// single-field so no coordination beyond the map itself is needed.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, events: mpsc::Sender<SessionEvent>) -> Arc<Session> {
        let session = Arc::new(Session::new(events));
        self.sessions.insert(session.id(), Arc::clone(&session));
        session
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| Arc::clone(&s))
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
