//! Avatar frame broadcast service.
//!
//! Serves any number of viewer connections a synchronized, low-frequency
//! stream of avatar frames reflecting the current shared animation state.
//! Each viewer gets its own periodic send loop; state changes are picked up
//! on the next scheduled frame, bounded by one frame interval of staleness.
//! That trades a little latency for a single simple timer loop per viewer
//! instead of fan-out-on-change.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::frames::FrameLibrary;
use crate::core::session::AnimationState;

/// Default frame cadence: 4 frames per second.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(250);

/// One broadcast unit. Frames are regenerated per tick, never diffed, and
/// are not addressed to individual viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarFrame {
    pub animation_state: AnimationState,
    pub payload: String,
}

/// Why a frame could not be delivered to a viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSendError {
    /// The viewer connection is gone; its loop must terminate.
    Closed,
    /// The viewer is not keeping up; drop this frame, keep the loop.
    Backpressure,
}

/// Delivery endpoint for one viewer's frames.
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, frame: AvatarFrame) -> Result<(), FrameSendError>;
}

/// A connected avatar-display client. Carries no conversational state.
pub struct Viewer {
    id: Uuid,
    last_frame_sent_at: Mutex<Option<Instant>>,
}

impl Viewer {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            last_frame_sent_at: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn last_frame_sent_at(&self) -> Option<Instant> {
        *self.last_frame_sent_at.lock()
    }

    fn mark_sent(&self) {
        *self.last_frame_sent_at.lock() = Some(Instant::now());
    }
}

/// Opaque handle returned by [`AnimationBroadcastService::register_viewer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewerHandle(Uuid);

struct ViewerEntry {
    viewer: Arc<Viewer>,
    task: JoinHandle<()>,
}

/// Multiplexes the shared avatar state to every registered viewer at a fixed
/// frame rate.
pub struct AnimationBroadcastService {
    /// Last-set-state wins; replaced atomically, read per tick.
    state: ArcSwap<AnimationState>,
    viewers: DashMap<Uuid, ViewerEntry>,
    frames: Arc<FrameLibrary>,
    frame_interval: Duration,
}

impl AnimationBroadcastService {
    pub fn new(frames: Arc<FrameLibrary>, frame_interval: Duration) -> Self {
        Self {
            state: ArcSwap::from_pointee(AnimationState::Idle),
            viewers: DashMap::new(),
            frames,
            frame_interval,
        }
    }

    /// Current broadcast state.
    pub fn current_state(&self) -> AnimationState {
        **self.state.load()
    }

    /// Atomically replace the broadcast state. Takes effect on each viewer's
    /// next scheduled frame.
    pub fn set_state(&self, state: AnimationState) {
        let previous = self.state.swap(Arc::new(state));
        if *previous != state {
            debug!("avatar state: {} -> {}", previous, state);
        }
    }

    /// Add a viewer and start its periodic send loop.
    pub fn register_viewer(self: &Arc<Self>, sink: Arc<dyn FrameSink>) -> ViewerHandle {
        let id = Uuid::new_v4();
        let viewer = Arc::new(Viewer::new(id));
        let task = tokio::spawn(Self::run_viewer_loop(
            Arc::clone(self),
            Arc::clone(&viewer),
            sink,
        ));
        self.viewers.insert(id, ViewerEntry { viewer, task });
        info!(viewer_id = %id, "viewer registered ({} total)", self.viewers.len());
        ViewerHandle(id)
    }

    /// Stop one viewer's send loop. No effect on other viewers; idempotent.
    pub fn unregister_viewer(&self, handle: ViewerHandle) {
        if let Some((_, entry)) = self.viewers.remove(&handle.0) {
            entry.task.abort();
            info!(viewer_id = %handle.0, "viewer unregistered ({} remain)", self.viewers.len());
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    pub fn viewer(&self, handle: ViewerHandle) -> Option<Arc<Viewer>> {
        self.viewers.get(&handle.0).map(|e| Arc::clone(&e.viewer))
    }

    async fn run_viewer_loop(
        service: Arc<AnimationBroadcastService>,
        viewer: Arc<Viewer>,
        sink: Arc<dyn FrameSink>,
    ) {
        // First frame goes out one full interval after registration, so
        // state changes racing the registration are already settled.
        let start = tokio::time::Instant::now() + service.frame_interval;
        let mut ticker = tokio::time::interval_at(start, service.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tick: usize = 0;
        loop {
            ticker.tick().await;

            let state = service.current_state();
            let frame = AvatarFrame {
                animation_state: state,
                payload: service.frames.frame(state, tick).to_string(),
            };
            tick = tick.wrapping_add(1);

            match sink.send_frame(frame) {
                Ok(()) => viewer.mark_sent(),
                Err(FrameSendError::Backpressure) => {
                    debug!(viewer_id = %viewer.id, "viewer lagging, frame dropped");
                }
                Err(FrameSendError::Closed) => {
                    debug!(viewer_id = %viewer.id, "viewer sink closed, stopping loop");
                    service.viewers.remove(&viewer.id);
                    break;
                }
            }
        }
    }
}
