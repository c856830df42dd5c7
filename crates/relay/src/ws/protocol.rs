use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use diagram_sync_common::protocol::ws::{encode_event, ServerEvent};

use super::MAX_FRAME_BYTES;

pub async fn send_ws_message(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

pub fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

pub fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

pub async fn close_frame_too_large(socket: &mut WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::SIZE,
            reason: frame_size_exceeded_reason().into(),
        })))
        .await;
}

/// Send a final `error` event, then close with a policy-violation code.
pub async fn reject_and_close(socket: &mut WebSocket, event: &ServerEvent) {
    let _ = send_ws_message(socket, event).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: event.name().to_string().into(),
        })))
        .await;
}
