//! Session WebSocket handler.
//!
//! One WebSocket connection is one conversational session. Incoming capture
//! events are translated into orchestrator calls; orchestrator events flow
//! back out through a per-connection sender task so the core never touches
//! socket types.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::session::SessionEvent;
use crate::core::stt::TranscribeOutcome;
use crate::core::OrchestratorError;
use crate::state::AppState;

use super::messages::{SessionIncomingMessage, SessionMessageRoute, SessionOutgoingMessage};

/// Per-connection outgoing channel depth
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// How often the connection is checked for staleness
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Session WebSocket handler
///
/// Upgrades the HTTP connection to WebSocket for the conversational capture
/// channel.
pub async fn session_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("session WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_session_socket(socket, state))
}

/// Handle one session connection end-to-end.
async fn handle_session_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<SessionMessageRoute>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, SessionMessageRoute::Close);

            let result = match route {
                SessionMessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                SessionMessageRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                SessionMessageRoute::Close => {
                    info!("closing session WebSocket connection");
                    sender.send(Message::Close(None)).await
                }
            };

            if let Err(e) = result {
                error!("failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    // Create the session and pump its events into the sender channel.
    let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(CHANNEL_BUFFER_SIZE);
    let session_id = app_state.orchestrator.create_session(events_tx).id();
    info!(session_id = %session_id, "session WebSocket connection established");

    let _ = message_tx
        .send(SessionMessageRoute::Outgoing(
            SessionOutgoingMessage::SessionCreated {
                session_id: session_id.to_string(),
            },
        ))
        .await;

    let pump_tx = message_tx.clone();
    let pump_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            let route = match event {
                SessionEvent::UtteranceEcho { user, assistant } => SessionMessageRoute::Outgoing(
                    SessionOutgoingMessage::UtteranceEcho { user, assistant },
                ),
                SessionEvent::SynthesisAudio(audio) => SessionMessageRoute::Audio(audio),
                SessionEvent::SynthesisRequest(request) => SessionMessageRoute::Outgoing(
                    SessionOutgoingMessage::SynthesisRequest {
                        text: request.text,
                        voice: request.voice,
                    },
                ),
                SessionEvent::CaptureRequest => {
                    SessionMessageRoute::Outgoing(SessionOutgoingMessage::CaptureRequest)
                }
            };
            if pump_tx.send(route).await.is_err() {
                break;
            }
        }
    });

    // Idle timeout with a small deterministic per-session jitter so a fleet
    // of stale connections does not all expire on the same tick.
    let jitter_secs = (session_id.as_u128() % 30) as u64;
    let idle_timeout = app_state.config.idle_timeout + Duration::from_secs(jitter_secs);
    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        let continue_processing = process_session_message(
                            msg,
                            session_id,
                            &message_tx,
                            &app_state,
                        ).await;

                        if !continue_processing {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, "session WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(session_id = %session_id, "session WebSocket closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if last_activity.elapsed() > idle_timeout {
                    warn!(
                        session_id = %session_id,
                        "session idle for {}s, closing stale connection",
                        last_activity.elapsed().as_secs()
                    );
                    let _ = message_tx
                        .send(SessionMessageRoute::Outgoing(SessionOutgoingMessage::Closing {
                            reason: "idle timeout".to_string(),
                        }))
                        .await;
                    let _ = message_tx.send(SessionMessageRoute::Close).await;
                    break;
                }
                debug!(session_id = %session_id, "session idle check - still active");
            }
        }
    }

    // Cleanup: the disconnect drops any in-flight turn for this session.
    app_state.orchestrator.on_disconnect(session_id);
    pump_task.abort();
    sender_task.abort();
    info!(session_id = %session_id, "session WebSocket connection terminated");
}

/// Process one incoming WebSocket message
async fn process_session_message(
    msg: Message,
    session_id: Uuid,
    message_tx: &mpsc::Sender<SessionMessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    match msg {
        Message::Text(text) => {
            debug!(session_id = %session_id, "received text message: {} bytes", text.len());

            let incoming_msg: SessionIncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(session_id = %session_id, "failed to parse session message: {}", e);
                    send_error(message_tx, "parse_error", format!("Invalid message format: {e}"))
                        .await;
                    return true;
                }
            };

            if let Err(e) = incoming_msg.validate_size() {
                warn!(session_id = %session_id, "message validation failed: {}", e);
                send_error(message_tx, "validation_error", e.to_string()).await;
                return true;
            }

            handle_session_incoming(incoming_msg, session_id, message_tx, app_state).await
        }
        Message::Binary(data) => {
            debug!(session_id = %session_id, "received capture audio: {} bytes", data.len());

            match app_state.stt.transcribe(data).await {
                Ok(TranscribeOutcome::Transcript(transcript)) => {
                    app_state.orchestrator.on_transcript(session_id, &transcript);
                }
                Ok(TranscribeOutcome::NeedsClientCapture) => {
                    let _ = message_tx
                        .send(SessionMessageRoute::Outgoing(
                            SessionOutgoingMessage::CaptureRequest,
                        ))
                        .await;
                }
                Err(e) => {
                    warn!(session_id = %session_id, "transcription failed: {}", e);
                    send_error(message_tx, "transcription_error", e.to_string()).await;
                }
            }
            true
        }
        Message::Ping(_) => {
            debug!("received ping");
            true
        }
        Message::Pong(_) => {
            debug!("received pong");
            true
        }
        Message::Close(_) => {
            info!(session_id = %session_id, "session WebSocket close received");
            false
        }
    }
}

/// Handle typed incoming messages
async fn handle_session_incoming(
    msg: SessionIncomingMessage,
    session_id: Uuid,
    message_tx: &mpsc::Sender<SessionMessageRoute>,
    app_state: &Arc<AppState>,
) -> bool {
    match msg {
        SessionIncomingMessage::CaptureResult { transcript } => {
            app_state.orchestrator.on_transcript(session_id, &transcript);
        }
        SessionIncomingMessage::CaptureStart => {
            match app_state.orchestrator.on_capture_start(session_id) {
                Ok(()) => {}
                Err(OrchestratorError::AlreadyCapturing) => {
                    send_error(message_tx, "already_capturing", "Already capturing".to_string())
                        .await;
                }
                Err(e) => {
                    send_error(message_tx, "capture_rejected", e.to_string()).await;
                }
            }
        }
        SessionIncomingMessage::PlaybackEnded => {
            app_state.orchestrator.on_playback_ended(session_id);
        }
    }
    true
}

async fn send_error(
    message_tx: &mpsc::Sender<SessionMessageRoute>,
    code: &str,
    message: String,
) {
    let _ = message_tx
        .send(SessionMessageRoute::Outgoing(SessionOutgoingMessage::Error {
            code: Some(code.to_string()),
            message,
        }))
        .await;
}
