//! Speech-capture resilience.
//!
//! Keeps a capture pipeline delivering transcripts despite recognizer
//! instability. Instead of nested recognizer callbacks, every recognizer
//! signal funnels through a single [`RecognitionResilienceManager::handle_event`]
//! entry point that returns the next [`CaptureDirective`] for the driver to
//! execute, which makes the escalation policy testable without a real
//! recognizer.
//!
//! Escalation is one-way by design: after two consecutive infrastructure
//! failures the manager suspends rather than alternating between two
//! unreliable paths. `Suspended` is a circuit breaker: cheap to leave via an
//! explicit user action, impossible to leave automatically.

mod driver;

pub use driver::{
    CaptureControl, CaptureDriver, CaptureUpdate, DEFAULT_SEGMENT_DURATION, Recognizer,
    SegmentRecorder,
};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur in the capture pipeline itself (as opposed to
/// recognizer-reported errors, which are [`RecognizerError`]s).
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No capture backend is usable
    #[error("No capture backend available")]
    Unavailable,

    /// The capture backend failed
    #[error("Capture backend error: {0}")]
    Backend(String),
}

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// How the current capture attempt acquires audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Continuous streaming recognition.
    PrimaryRecognizer,
    /// Fixed-length audio segments forwarded to server-side transcription;
    /// chosen only when the primary recognizer is unavailable at start.
    FallbackRecorder,
    /// Offline. Terminal for the life of the process.
    Suspended,
}

/// Recognizer-reported failure classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerError {
    /// Nothing was said; harmless.
    NoSpeech,
    /// Microphone permission denied.
    NotAllowed,
    Network,
    Aborted,
    AudioCapture,
    ServiceNotAllowed,
    /// Anything the recognizer reports that we do not classify.
    Other(String),
}

impl RecognizerError {
    /// Infrastructure-level failures count toward suspension; the rest do not.
    fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            RecognizerError::Network
                | RecognizerError::Aborted
                | RecognizerError::AudioCapture
                | RecognizerError::ServiceNotAllowed
        )
    }
}

/// A recognizer lifecycle signal, as delivered by the driver.
///
/// The driver only forwards events from the current recognizer instance, so
/// an `Ended` from an instance that was already replaced never reaches the
/// manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Result { transcript: String, is_final: bool },
    Error(RecognizerError),
    /// End-of-stream from the recognizer.
    Ended,
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDirective {
    /// Nothing; keep listening for events.
    Continue,
    /// Publish an interim transcript update.
    Interim(String),
    /// Flush a final transcript to the orchestrator.
    Submit(String),
    /// Start a fresh recognizer instance immediately.
    Restart,
    /// Halt the attempt and wait for an explicit permission re-grant.
    AwaitPermission,
    /// Enter offline mode and surface a one-time notice.
    Suspend,
}

/// The capture-side state machine. Pure: no I/O, no recognizer handles.
pub struct RecognitionResilienceManager {
    mode: CaptureMode,
    consecutive_failures: u32,
    interim_transcript: String,
    final_transcript: String,
    /// Whether we are supposed to be capturing (spontaneous end-of-stream
    /// only restarts while this holds).
    capturing: bool,
    awaiting_permission: bool,
}

impl RecognitionResilienceManager {
    /// `primary_available` reflects the recognizer capability probe at
    /// capture start; when absent, segment recording is the starting mode.
    pub fn new(primary_available: bool) -> Self {
        let mode = if primary_available {
            CaptureMode::PrimaryRecognizer
        } else {
            info!("primary recognizer unavailable, starting in fallback recorder mode");
            CaptureMode::FallbackRecorder
        };
        Self {
            mode,
            consecutive_failures: 0,
            interim_transcript: String::new(),
            final_transcript: String::new(),
            capturing: false,
            awaiting_permission: false,
        }
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn awaiting_permission(&self) -> bool {
        self.awaiting_permission
    }

    pub fn interim_transcript(&self) -> &str {
        &self.interim_transcript
    }

    /// Mark the attempt active. Idempotent.
    pub fn begin(&mut self) {
        self.capturing = true;
    }

    /// Mark the attempt stopped; subsequent end-of-stream events will not
    /// restart.
    pub fn halt(&mut self) {
        self.capturing = false;
    }

    /// The single entry point: fold one recognizer event into the machine
    /// and return what the driver should do.
    pub fn handle_event(&mut self, event: CaptureEvent) -> CaptureDirective {
        if self.mode == CaptureMode::Suspended {
            // Offline: every further signal is ignored.
            debug!("suspended, ignoring capture event: {:?}", event);
            return CaptureDirective::Continue;
        }

        match event {
            CaptureEvent::Result {
                transcript,
                is_final: false,
            } => {
                self.interim_transcript = transcript.clone();
                CaptureDirective::Interim(transcript)
            }
            CaptureEvent::Result {
                transcript,
                is_final: true,
            } => {
                self.consecutive_failures = 0;
                self.interim_transcript.clear();
                self.final_transcript.push_str(&transcript);
                let flushed = std::mem::take(&mut self.final_transcript);
                CaptureDirective::Submit(flushed)
            }
            CaptureEvent::Error(error) => self.handle_error(error),
            CaptureEvent::Ended => {
                if self.capturing && !self.awaiting_permission {
                    debug!("recognizer ended while capturing, restarting");
                    CaptureDirective::Restart
                } else {
                    CaptureDirective::Continue
                }
            }
        }
    }

    /// Explicit manual re-grant signal after a permission denial.
    pub fn permission_granted(&mut self) -> CaptureDirective {
        if self.mode == CaptureMode::Suspended {
            return CaptureDirective::Continue;
        }
        if self.awaiting_permission {
            info!("microphone permission re-granted, resuming capture");
            self.awaiting_permission = false;
            CaptureDirective::Restart
        } else {
            CaptureDirective::Continue
        }
    }

    fn handle_error(&mut self, error: RecognizerError) -> CaptureDirective {
        match error {
            RecognizerError::NoSpeech => {
                // Harmless; the recognizer restarts on its end-of-stream.
                debug!("no speech detected, continuing");
                CaptureDirective::Continue
            }
            RecognizerError::NotAllowed => {
                // Retrying against a denied permission would loop.
                warn!("microphone permission denied, awaiting manual re-grant");
                self.awaiting_permission = true;
                CaptureDirective::AwaitPermission
            }
            ref e if e.is_infrastructure() => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= 2 {
                    warn!(
                        "capture error {:?} after a failed restart, suspending capture",
                        error
                    );
                    self.mode = CaptureMode::Suspended;
                    self.capturing = false;
                    CaptureDirective::Suspend
                } else {
                    warn!("capture error {:?}, attempting one restart", error);
                    CaptureDirective::Restart
                }
            }
            RecognizerError::Other(ref message) => {
                warn!("unclassified recognizer error: {}", message);
                CaptureDirective::Restart
            }
            // Infrastructure variants are matched by the guard above.
            _ => unreachable!("all recognizer error classes handled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> RecognitionResilienceManager {
        let mut m = RecognitionResilienceManager::new(true);
        m.begin();
        m
    }

    fn network_error() -> CaptureEvent {
        CaptureEvent::Error(RecognizerError::Network)
    }

    #[test]
    fn test_final_result_submits_and_clears() {
        let mut m = manager();

        let directive = m.handle_event(CaptureEvent::Result {
            transcript: "włącz światło".to_string(),
            is_final: true,
        });
        assert_eq!(directive, CaptureDirective::Submit("włącz światło".to_string()));
        assert!(m.interim_transcript().is_empty());

        // The buffer was flushed; a second final result stands alone.
        let directive = m.handle_event(CaptureEvent::Result {
            transcript: "dobranoc".to_string(),
            is_final: true,
        });
        assert_eq!(directive, CaptureDirective::Submit("dobranoc".to_string()));
    }

    #[test]
    fn test_interim_results_accumulate_without_submit() {
        let mut m = manager();

        let directive = m.handle_event(CaptureEvent::Result {
            transcript: "włącz".to_string(),
            is_final: false,
        });
        assert_eq!(directive, CaptureDirective::Interim("włącz".to_string()));
        assert_eq!(m.interim_transcript(), "włącz");
    }

    #[test]
    fn test_two_network_errors_suspend() {
        let mut m = manager();

        assert_eq!(m.handle_event(network_error()), CaptureDirective::Restart);
        assert_eq!(m.mode(), CaptureMode::PrimaryRecognizer);

        assert_eq!(m.handle_event(network_error()), CaptureDirective::Suspend);
        assert_eq!(m.mode(), CaptureMode::Suspended);

        // No third restart: everything after suspension is ignored.
        assert_eq!(m.handle_event(network_error()), CaptureDirective::Continue);
        assert_eq!(m.handle_event(CaptureEvent::Ended), CaptureDirective::Continue);
        assert_eq!(m.mode(), CaptureMode::Suspended);
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let mut m = manager();

        assert_eq!(m.handle_event(network_error()), CaptureDirective::Restart);
        assert_eq!(m.consecutive_failures(), 1);

        m.handle_event(CaptureEvent::Result {
            transcript: "działa".to_string(),
            is_final: true,
        });
        assert_eq!(m.consecutive_failures(), 0);
        assert_eq!(m.mode(), CaptureMode::PrimaryRecognizer);

        // The counter restarted: one more network error retries again.
        assert_eq!(m.handle_event(network_error()), CaptureDirective::Restart);
        assert_eq!(m.mode(), CaptureMode::PrimaryRecognizer);
    }

    #[test]
    fn test_mixed_infrastructure_errors_suspend() {
        let mut m = manager();

        assert_eq!(
            m.handle_event(CaptureEvent::Error(RecognizerError::AudioCapture)),
            CaptureDirective::Restart
        );
        assert_eq!(
            m.handle_event(CaptureEvent::Error(RecognizerError::ServiceNotAllowed)),
            CaptureDirective::Suspend
        );
        assert_eq!(m.mode(), CaptureMode::Suspended);
    }

    #[test]
    fn test_not_allowed_never_restarts() {
        let mut m = manager();

        let directive = m.handle_event(CaptureEvent::Error(RecognizerError::NotAllowed));
        assert_eq!(directive, CaptureDirective::AwaitPermission);
        assert!(m.awaiting_permission());

        // End-of-stream while halted on permission must not restart.
        assert_eq!(m.handle_event(CaptureEvent::Ended), CaptureDirective::Continue);
        assert_eq!(m.mode(), CaptureMode::PrimaryRecognizer);
    }

    #[test]
    fn test_permission_regrant_restarts() {
        let mut m = manager();
        m.handle_event(CaptureEvent::Error(RecognizerError::NotAllowed));

        assert_eq!(m.permission_granted(), CaptureDirective::Restart);
        assert!(!m.awaiting_permission());

        // Without a pending denial the signal is a no-op.
        assert_eq!(m.permission_granted(), CaptureDirective::Continue);
    }

    #[test]
    fn test_no_speech_is_ignored() {
        let mut m = manager();

        let directive = m.handle_event(CaptureEvent::Error(RecognizerError::NoSpeech));
        assert_eq!(directive, CaptureDirective::Continue);
        assert_eq!(m.consecutive_failures(), 0);

        // The subsequent end-of-stream performs the restart.
        assert_eq!(m.handle_event(CaptureEvent::Ended), CaptureDirective::Restart);
    }

    #[test]
    fn test_unclassified_error_restarts_without_counting() {
        let mut m = manager();

        let directive = m.handle_event(CaptureEvent::Error(RecognizerError::Other(
            "bad-grammar".to_string(),
        )));
        assert_eq!(directive, CaptureDirective::Restart);
        assert_eq!(m.consecutive_failures(), 0);
        assert_eq!(m.mode(), CaptureMode::PrimaryRecognizer);
    }

    #[test]
    fn test_ended_after_halt_does_not_restart() {
        let mut m = manager();
        m.halt();
        assert_eq!(m.handle_event(CaptureEvent::Ended), CaptureDirective::Continue);
    }

    #[test]
    fn test_fallback_mode_when_primary_unavailable() {
        let m = RecognitionResilienceManager::new(false);
        assert_eq!(m.mode(), CaptureMode::FallbackRecorder);
    }

    #[test]
    fn test_fallback_mode_also_suspends_after_two_failures() {
        let mut m = RecognitionResilienceManager::new(false);
        m.begin();

        assert_eq!(m.handle_event(network_error()), CaptureDirective::Restart);
        assert_eq!(m.handle_event(network_error()), CaptureDirective::Suspend);
        assert_eq!(m.mode(), CaptureMode::Suspended);
    }

    #[test]
    fn test_suspension_is_terminal_even_for_permission_grant() {
        let mut m = manager();
        m.handle_event(network_error());
        m.handle_event(network_error());
        assert_eq!(m.mode(), CaptureMode::Suspended);

        assert_eq!(m.permission_granted(), CaptureDirective::Continue);
        assert_eq!(m.mode(), CaptureMode::Suspended);
    }
}
