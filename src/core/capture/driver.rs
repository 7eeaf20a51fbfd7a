//! Capture driver: runs the resilience state machine against a real (or
//! fake) recognizer backend.
//!
//! The driver owns one recognizer instance per attempt, forwards only the
//! current instance's events into the manager, and executes the directives
//! the manager returns. Mode transitions happen on event boundaries and
//! never block the capture task.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{
    CaptureDirective, CaptureEvent, CaptureMode, CaptureResult, RecognitionResilienceManager,
    RecognizerError,
};

/// Default length of a fallback recording segment.
pub const DEFAULT_SEGMENT_DURATION: Duration = Duration::from_secs(5);

/// Streaming recognition backend. Each `start` call creates one capture
/// attempt whose events arrive on the returned channel until end-of-stream.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Capability probe, checked once at capture start.
    fn is_available(&self) -> bool {
        true
    }

    async fn start(&self) -> CaptureResult<mpsc::Receiver<CaptureEvent>>;
}

/// Fixed-length segment recorder used when no streaming recognizer exists.
#[async_trait]
pub trait SegmentRecorder: Send + Sync {
    async fn record(&self, duration: Duration) -> CaptureResult<Bytes>;
}

/// Updates the driver publishes toward the transport gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureUpdate {
    /// A finished transcript, ready for submission to the orchestrator.
    Transcript(String),
    /// In-progress recognition text, display only.
    Interim(String),
    /// A recorded audio segment for server-side transcription.
    AudioSegment(Bytes),
    /// Capture halted awaiting a microphone permission re-grant.
    NeedsPermission,
    /// Capture suspended; surfaced exactly once.
    Suspended,
}

/// Control messages into a running driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureControl {
    /// The user re-granted microphone permission.
    PermissionGranted,
    /// Stop capturing and exit.
    Stop,
}

/// Drives one capture pipeline to completion.
pub struct CaptureDriver<R: Recognizer> {
    recognizer: R,
    fallback: Option<Box<dyn SegmentRecorder>>,
    segment_duration: Duration,
    manager: RecognitionResilienceManager,
    updates: mpsc::Sender<CaptureUpdate>,
    control: mpsc::Receiver<CaptureControl>,
}

impl<R: Recognizer> CaptureDriver<R> {
    pub fn new(
        recognizer: R,
        fallback: Option<Box<dyn SegmentRecorder>>,
        updates: mpsc::Sender<CaptureUpdate>,
    ) -> (Self, mpsc::Sender<CaptureControl>) {
        let (control_tx, control_rx) = mpsc::channel(8);
        let manager = RecognitionResilienceManager::new(recognizer.is_available());
        let driver = Self {
            recognizer,
            fallback,
            segment_duration: DEFAULT_SEGMENT_DURATION,
            manager,
            updates,
            control: control_rx,
        };
        (driver, control_tx)
    }

    pub fn with_segment_duration(mut self, duration: Duration) -> Self {
        self.segment_duration = duration;
        self
    }

    pub fn mode(&self) -> CaptureMode {
        self.manager.mode()
    }

    /// Run the capture loop until stopped or suspended with no way back.
    pub async fn run(mut self) {
        self.manager.begin();

        match self.manager.mode() {
            CaptureMode::PrimaryRecognizer => self.run_recognizer().await,
            CaptureMode::FallbackRecorder => self.run_fallback().await,
            CaptureMode::Suspended => {}
        }

        debug!("capture driver finished in mode {:?}", self.manager.mode());
    }

    async fn run_recognizer(&mut self) {
        let mut events = match self.recognizer.start().await {
            Ok(rx) => Some(rx),
            Err(e) => {
                error!("failed to start recognizer: {}", e);
                let directive = self.start_failure();
                self.execute(directive, None).await
            }
        };

        loop {
            tokio::select! {
                control = self.control.recv() => {
                    match control {
                        Some(CaptureControl::PermissionGranted) => {
                            let directive = self.manager.permission_granted();
                            events = self.execute(directive, events).await;
                        }
                        Some(CaptureControl::Stop) | None => {
                            self.manager.halt();
                            break;
                        }
                    }
                }
                event = Self::next_event(&mut events) => {
                    let directive = self.manager.handle_event(event);
                    events = self.execute(directive, events).await;
                }
            }

            if self.manager.mode() == CaptureMode::Suspended && events.is_none() {
                // Nothing left to listen to; only a Stop can arrive now.
                match self.control.recv().await {
                    Some(CaptureControl::Stop) | None => break,
                    Some(_) => continue,
                }
            }
        }
    }

    /// Fallback path: record fixed-length segments and forward them for
    /// server-side transcription until stopped.
    async fn run_fallback(&mut self) {
        let Some(recorder) = self.fallback.take() else {
            error!("fallback recorder mode selected but no recorder configured");
            return;
        };
        info!(
            "recording {}s segments for server-side transcription",
            self.segment_duration.as_secs()
        );

        loop {
            tokio::select! {
                control = self.control.recv() => {
                    match control {
                        Some(CaptureControl::Stop) | None => {
                            self.manager.halt();
                            break;
                        }
                        Some(CaptureControl::PermissionGranted) => {
                            self.manager.permission_granted();
                        }
                    }
                }
                segment = recorder.record(self.segment_duration) => {
                    match segment {
                        Ok(audio) => {
                            self.publish(CaptureUpdate::AudioSegment(audio)).await;
                        }
                        Err(e) => {
                            warn!("segment recording failed: {}", e);
                            let directive = self
                                .manager
                                .handle_event(CaptureEvent::Error(RecognizerError::AudioCapture));
                            if matches!(directive, CaptureDirective::Suspend) {
                                self.publish(CaptureUpdate::Suspended).await;
                                break;
                            }
                        }
                    }
                }
            }

            if self.manager.mode() == CaptureMode::Suspended {
                break;
            }
        }
    }

    /// Wait for the next event from the current recognizer instance; a
    /// closed channel is the recognizer's end-of-stream.
    async fn next_event(events: &mut Option<mpsc::Receiver<CaptureEvent>>) -> CaptureEvent {
        match events {
            Some(rx) => match rx.recv().await {
                Some(event) => event,
                None => {
                    *events = None;
                    CaptureEvent::Ended
                }
            },
            // No active instance: park until a control message arrives.
            None => std::future::pending().await,
        }
    }

    async fn execute(
        &mut self,
        directive: CaptureDirective,
        events: Option<mpsc::Receiver<CaptureEvent>>,
    ) -> Option<mpsc::Receiver<CaptureEvent>> {
        match directive {
            CaptureDirective::Continue => events,
            CaptureDirective::Interim(text) => {
                self.publish(CaptureUpdate::Interim(text)).await;
                events
            }
            CaptureDirective::Submit(text) => {
                self.publish(CaptureUpdate::Transcript(text)).await;
                events
            }
            CaptureDirective::Restart => {
                // The previous instance's channel is dropped here, so its
                // trailing events never reach the manager.
                drop(events);
                match self.recognizer.start().await {
                    Ok(rx) => Some(rx),
                    Err(e) => {
                        error!("recognizer restart failed: {}", e);
                        let directive = self.start_failure();
                        Box::pin(self.execute(directive, None)).await
                    }
                }
            }
            CaptureDirective::AwaitPermission => {
                self.publish(CaptureUpdate::NeedsPermission).await;
                drop(events);
                None
            }
            CaptureDirective::Suspend => {
                self.publish(CaptureUpdate::Suspended).await;
                drop(events);
                None
            }
        }
    }

    /// A failed start is an infrastructure failure from the machine's point
    /// of view: it counts toward suspension like any capture-level error.
    fn start_failure(&mut self) -> CaptureDirective {
        self.manager
            .handle_event(CaptureEvent::Error(RecognizerError::AudioCapture))
    }

    async fn publish(&self, update: CaptureUpdate) {
        if self.updates.send(update).await.is_err() {
            debug!("capture update channel closed");
        }
    }
}
