//! Viewer WebSocket handler.
//!
//! A viewer connection is a pure frame sink: it subscribes to the broadcast
//! service and renders whatever arrives. It carries no conversational state
//! and sends nothing meaningful upstream; a failed send or a close tears
//! down only that viewer.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::broadcast::{AvatarFrame, FrameSendError, FrameSink};
use crate::core::session::AnimationState;
use crate::state::AppState;

/// A couple of frames of slack; a viewer further behind starts dropping.
const FRAME_BUFFER_SIZE: usize = 4;

/// Outgoing WebSocket messages to the viewer
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ViewerOutgoingMessage {
    /// One avatar frame
    #[serde(rename = "avatar_frame")]
    AvatarFrame {
        /// Animation state the frame belongs to
        animation_state: AnimationState,
        /// Renderable ASCII payload
        payload: String,
    },
}

/// Bridges the broadcast service to this connection's frame channel.
struct ChannelFrameSink(mpsc::Sender<AvatarFrame>);

impl FrameSink for ChannelFrameSink {
    fn send_frame(&self, frame: AvatarFrame) -> Result<(), FrameSendError> {
        match self.0.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(FrameSendError::Backpressure),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(FrameSendError::Closed),
        }
    }
}

/// Viewer WebSocket handler
///
/// Upgrades the HTTP connection to WebSocket and streams avatar frames at
/// the configured cadence until the client goes away.
pub async fn viewer_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("viewer WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_viewer_socket(socket, state))
}

async fn handle_viewer_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let (frame_tx, mut frame_rx) = mpsc::channel::<AvatarFrame>(FRAME_BUFFER_SIZE);
    let handle = app_state
        .broadcast
        .register_viewer(Arc::new(ChannelFrameSink(frame_tx)));

    loop {
        select! {
            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    break;
                };
                let message = ViewerOutgoingMessage::AvatarFrame {
                    animation_state: frame.animation_state,
                    payload: frame.payload,
                };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("failed to serialize avatar frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(json.into())).await {
                    debug!("viewer send failed, closing: {}", e);
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        info!("viewer WebSocket closed");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Viewers have nothing to say; ignore.
                    }
                    Some(Err(e)) => {
                        warn!("viewer WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    app_state.broadcast.unregister_viewer(handle);
}
