//! Live channel for chat messages, unread badges and admin alerts.
//!
//! Clients send `{"action":"join","key":"chat-4-9-p2"}` to follow a
//! conversation and `{"action":"leave",...}` to stop. Server pushes are
//! hub payloads, `{"type": ..., "data": ...}`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::session::CurrentUser;
use super::AppState;
use crate::domain::Id;
use crate::hub::Membership;
use crate::metrics;

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum ClientCommand {
    Join { key: String },
    Leave { key: String },
}

/// Applies one client frame to the membership and returns the reply frame.
fn apply_command(membership: &mut Membership, text: &str) -> String {
    match serde_json::from_str::<ClientCommand>(text) {
        Ok(ClientCommand::Join { key }) => {
            let ok = membership.join(&key);
            json!({ "type": "Joined", "data": { "key": key, "ok": ok } }).to_string()
        }
        Ok(ClientCommand::Leave { key }) => {
            let ok = membership.leave(&key);
            json!({ "type": "Left", "data": { "key": key, "ok": ok } }).to_string()
        }
        Err(e) => json!({ "type": "Error", "data": { "message": e.to_string() } }).to_string(),
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Response {
    let membership = Membership::new(user.id, user.is_admin());
    ws.on_upgrade(move |socket| handle_socket(state, socket, membership, user.id))
}

async fn handle_socket(state: AppState, socket: WebSocket, mut membership: Membership, user_id: Id) {
    info!(user_id, "Live connection opened");
    let (mut sender, mut receiver) = socket.split();
    let mut events = state.market.hub.subscribe();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = apply_command(&mut membership, &text);
                        if sender.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(user_id, error = %e, "Live connection read failed");
                        break;
                    }
                }
            }
            recv = events.recv() => {
                match recv {
                    Ok(event) if membership.accepts(&event) => {
                        match state.market.may_stay_connected(user_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                info!(user_id, "Closing live connection of a blocked user");
                                let _ = sender.send(Message::Close(None)).await;
                                break;
                            }
                            Err(e) => {
                                warn!(user_id, error = %e, "Live connection user check failed");
                                break;
                            }
                        }
                        let frame = match serde_json::to_string(&event.payload) {
                            Ok(frame) => frame,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize hub event");
                                continue;
                            }
                        };
                        if sender.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        metrics::hub_events_dropped(skipped);
                        warn!(user_id, skipped, "Live connection fell behind; events skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!(user_id, "Live connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::conversation_key;

    #[test]
    fn join_and_leave_conversations() {
        let mut membership = Membership::new(4, false);
        let key = conversation_key(4, 9, 2);

        let reply = apply_command(&mut membership, &format!(r#"{{"action":"join","key":"{}"}}"#, key));
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["type"], "Joined");
        assert_eq!(reply["data"]["ok"], true);

        let reply = apply_command(&mut membership, &format!(r#"{{"action":"leave","key":"{}"}}"#, key));
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["data"]["ok"], true);
    }

    #[test]
    fn outsiders_cannot_join() {
        let mut membership = Membership::new(5, false);
        let key = conversation_key(4, 9, 2);
        let reply = apply_command(&mut membership, &format!(r#"{{"action":"join","key":"{}"}}"#, key));
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["data"]["ok"], false);
    }

    #[test]
    fn garbage_frames_get_an_error_reply() {
        let mut membership = Membership::new(5, false);
        let reply: serde_json::Value = serde_json::from_str(&apply_command(&mut membership, "hello")).unwrap();
        assert_eq!(reply["type"], "Error");
    }
}
