// One diagram session per WebSocket connection.
//
// Every frame the session emits, private replies included, is queued on the
// session's outbound channel and written by the loop below, so a private
// reply never overtakes a group event queued before it.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use diagram_sync_common::edit::TaggedEdit;
use diagram_sync_common::key::DocumentKey;
use diagram_sync_common::protocol::ws::{decode_command, ClientCommand, PresenceState, ServerEvent};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::protocol::{
    close_frame_too_large, is_frame_size_violation, reject_and_close, send_ws_message,
};
use super::{HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_FRAME_BYTES};
use crate::error::ErrorCode;
use crate::group::MemberSender;
use crate::presence;
use crate::sync::{apply_batch, ApplyOutcome, BatchStop, DiagramHandle, SyncError};
use crate::AppState;

pub(super) async fn run_session(
    state: AppState,
    raw_key: String,
    actor: Option<Uuid>,
    mut socket: WebSocket,
) {
    let session_id = Uuid::new_v4();
    let span = info_span!("ws.session", session_id = %session_id, key = %raw_key);

    async move {
        let handle = match connect(&state, &raw_key).await {
            Ok(handle) => handle,
            Err(event) => {
                reject_and_close(&mut socket, &event).await;
                return;
            }
        };

        let bus = state.controller.bus().clone();
        let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
        bus.group_add(handle.group(), session_id, outbound_sender.clone()).await;
        presence::announce(&bus, handle.group(), actor, PresenceState::Join).await;
        info!(diagram_id = %handle.id, group = handle.group(), "session connected");

        let session = Session { state: &state, handle: &handle, actor, outbound: outbound_sender };

        // Heartbeat: ping every HEARTBEAT_INTERVAL_MS; a ping left unanswered
        // for HEARTBEAT_TIMEOUT_MS ends the session.
        let mut heartbeat_interval =
            tokio::time::interval(Duration::from_millis(HEARTBEAT_INTERVAL_MS));
        heartbeat_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat_interval.reset();
        let heartbeat_timeout = Duration::from_millis(HEARTBEAT_TIMEOUT_MS);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            // Inbound first so a pong buffered during a slow command is seen
            // before the pong deadline fires.
            tokio::select! {
                biased;

                maybe_message = socket.recv() => {
                    let Some(message) = maybe_message else {
                        break;
                    };

                    match message {
                        Ok(Message::Text(raw_message)) => {
                            if raw_message.len() > MAX_FRAME_BYTES {
                                close_frame_too_large(&mut socket).await;
                                break;
                            }
                            match decode_command(raw_message.as_str()) {
                                Ok(command) => session.dispatch(command).await,
                                Err(error) => session.reply(ServerEvent::error(
                                    ErrorCode::InvalidMessage.as_str(),
                                    format!("{}: {error}", ErrorCode::InvalidMessage.default_message()),
                                )),
                            }
                        }
                        Ok(Message::Binary(_)) => session.reply(ServerEvent::error(
                            ErrorCode::InvalidMessage.as_str(),
                            "binary frames are not supported",
                        )),
                        Ok(Message::Ping(payload)) => {
                            if socket.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Pong(_)) => {
                            pong_deadline = None;
                        }
                        Ok(Message::Close(_)) => break,
                        Err(error) if is_frame_size_violation(&error) => {
                            close_frame_too_large(&mut socket).await;
                            break;
                        }
                        Err(error) => {
                            debug!(error = %error, "websocket receive failed");
                            break;
                        }
                    }
                }
                maybe_outbound = outbound_receiver.recv() => {
                    match maybe_outbound {
                        Some(event) => {
                            if send_ws_message(&mut socket, &event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat_interval.tick() => {
                    if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                    pong_deadline.get_or_insert_with(|| Instant::now() + heartbeat_timeout);
                }
                _ = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)),
                    if pong_deadline.is_some() =>
                {
                    warn!("heartbeat timeout, disconnecting");
                    break;
                }
            }
        }

        bus.group_discard(handle.group(), session_id).await;
        presence::announce(&bus, handle.group(), actor, PresenceState::Leave).await;
        info!(diagram_id = %handle.id, "session disconnected");
    }
    .instrument(span)
    .await
}

/// Validate the route key and resolve it to a diagram. The error event is
/// sent to the client before the socket is closed.
async fn connect(state: &AppState, raw_key: &str) -> Result<DiagramHandle, ServerEvent> {
    let key = DocumentKey::parse(raw_key).map_err(|error| {
        ServerEvent::error(ErrorCode::ResolutionFailed.as_str(), error.to_string())
    })?;

    state.controller.resolve(&key).await.map_err(|error| {
        warn!(error = %error, "document key did not resolve");
        ServerEvent::error(error.code().as_str(), error.client_message())
    })
}

struct Session<'a> {
    state: &'a AppState,
    handle: &'a DiagramHandle,
    actor: Option<Uuid>,
    outbound: MemberSender,
}

impl Session<'_> {
    fn reply(&self, event: ServerEvent) {
        // The receiver lives as long as the session loop.
        let _ = self.outbound.send(event);
    }

    fn reply_sync_error(&self, error: SyncError) {
        if let SyncError::Storage(source) = &error {
            error!(error = %format!("{source:#}"), "command failed on storage");
        }
        self.reply(ServerEvent::error(error.code().as_str(), error.client_message()));
    }

    async fn dispatch(&self, command: ClientCommand) {
        match command {
            ClientCommand::Init => self.handle_init().await,
            ClientCommand::Drag { id, pos } => {
                self.broadcast(ServerEvent::Drag { user_id: self.actor, id, pos }).await;
            }
            ClientCommand::DragEnd { id, pos } => {
                self.broadcast(ServerEvent::DragEnd { user_id: self.actor, id, pos }).await;
            }
            ClientCommand::Op { base_version, op } => self.handle_op(base_version, op).await,
            ClientCommand::AiUpdate { prompt } => self.handle_ai_update(prompt).await,
        }
    }

    async fn broadcast(&self, event: ServerEvent) {
        self.state.controller.bus().group_send(self.handle.group(), event).await;
    }

    async fn handle_init(&self) {
        match self.state.controller.snapshot(self.handle).await {
            Ok(diagram) => self.reply(ServerEvent::Snapshot {
                diagram_id: diagram.id,
                version: diagram.version,
                snapshot: diagram.snapshot,
            }),
            Err(error) => self.reply_sync_error(error),
        }
    }

    async fn handle_op(&self, base_version: i64, op: serde_json::Value) {
        let edit = match TaggedEdit::parse(op) {
            Ok(edit) => edit,
            Err(error) => {
                self.reply(ServerEvent::error(error.code(), error.to_string()));
                return;
            }
        };

        match self.state.controller.apply_resolved(self.handle, base_version, edit, self.actor).await
        {
            // The controller has already broadcast the `op` event.
            Ok(ApplyOutcome::Applied { .. }) => {}
            Ok(ApplyOutcome::Conflict { current_version, snapshot }) => {
                self.reply(ServerEvent::Conflict { current_version, snapshot });
            }
            Err(error) => self.reply_sync_error(error),
        }
    }

    async fn handle_ai_update(&self, prompt: String) {
        let diagram = match self.state.controller.snapshot(self.handle).await {
            Ok(diagram) => diagram,
            Err(error) => {
                self.reply_sync_error(error);
                return;
            }
        };

        // No diagram lock is held while the agent works.
        let edits = match self.state.agent.propose(&prompt, &diagram.snapshot).await {
            Ok(edits) => edits,
            Err(error) => {
                warn!(agent = self.state.agent.kind(), error = %error, "agent call failed");
                self.reply(ServerEvent::error(ErrorCode::AgentFailed.as_str(), error.to_string()));
                return;
            }
        };

        let sink = self.state.controller.bind(self.handle, self.actor);
        let report = apply_batch(&sink, diagram.version, edits).await;

        match report.stop {
            None => {}
            Some(BatchStop::Conflict { current_version, snapshot, .. }) => {
                self.reply(ServerEvent::Conflict { current_version, snapshot });
            }
            Some(BatchStop::Rejected { index, error }) => self.reply(ServerEvent::error(
                error.code(),
                format!("agent edit #{index} rejected: {error}"),
            )),
            Some(BatchStop::Failed { error, .. }) => self.reply_sync_error(error),
        }

        self.reply(ServerEvent::AiApplied { applied: report.applied, version: report.version });
    }
}
