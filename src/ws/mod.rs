//! WebSocket attachment transport and control protocol.
//!
//! ## Connection lifecycle
//!
//! 1. Client upgrades `GET /ws/{id}` (optional `?readOnly=1`). The session
//!    must exist and be Ready; otherwise the socket closes with 1011.
//! 2. The peer is added to the session's peer set and receives the
//!    `\r\n[attached]\r\n` banner (that peer only — no scrollback replay).
//! 3. Shell output arrives as binary frames; the only text frames a peer
//!    ever receives are the banner and `{"type":"pong"}` replies.
//! 4. On disconnect the peer is detached and a `ws-detached` summary goes
//!    out.
//!
//! ## Control frames (peer → server)
//!
//! A text frame that trims to a `{...}` JSON object with a string `type` is a
//! control frame:
//!
//! | Type     | Fields         | Effect                                    |
//! |----------|----------------|-------------------------------------------|
//! | `resize` | `cols`, `rows` | PTY window change (ignored if not finite)  |
//! | `stdin`  | `data`         | Write `data` to the shell                  |
//! | `ping`   | —              | Reply `{"type":"pong"}` to this peer       |
//! | `detach` | —              | Close this peer with 1000 "Detached"       |
//!
//! Anything else — binary frames, non-JSON text, JSON without a string
//! `type`, or a `type` outside the four above — is forwarded to the shell as
//! raw bytes (binary paste path). In
//! read-only mode `resize`, `stdin`, and raw passthrough are suppressed;
//! `ping` and `detach` still work, and every frame still counts as activity.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::sessions::session::PeerFrame;
use crate::AppState;

/// Query parameters for the upgrade request.
#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(rename = "readOnly", default)]
    pub read_only: Option<String>,
}

/// A decoded control frame, or the decision to ignore one.
#[derive(Debug, PartialEq)]
pub enum ControlFrame {
    Resize { cols: u16, rows: u16 },
    Stdin(String),
    Ping,
    Detach,
    /// A `resize` frame whose dimensions are not finite numbers. Consumed,
    /// never forwarded.
    Ignored,
}

/// Decode a text payload. `None` means raw passthrough to the shell.
pub fn parse_control_frame(text: &str) -> Option<ControlFrame> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let kind = value.get("type")?.as_str()?;
    Some(match kind {
        "resize" => {
            let cols = value.get("cols").and_then(Value::as_f64);
            let rows = value.get("rows").and_then(Value::as_f64);
            match (cols, rows) {
                (Some(c), Some(r)) if c.is_finite() && r.is_finite() => {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let (cols, rows) = (c as u16, r as u16);
                    ControlFrame::Resize { cols, rows }
                }
                _ => ControlFrame::Ignored,
            }
        }
        "stdin" => {
            let data = match value.get("data") {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            };
            ControlFrame::Stdin(data)
        }
        "ping" => ControlFrame::Ping,
        "detach" => ControlFrame::Detach,
        // Not one of the four control shapes — raw passthrough.
        _ => return None,
    })
}

/// `GET /ws/{id}?readOnly=1` — WebSocket upgrade handler.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let read_only = matches!(query.read_only.as_deref(), Some("1" | "true"));
    ws.on_upgrade(move |socket| handle_peer(socket, state, id, read_only))
}

/// Per-peer event loop: pumps fan-out frames to the socket and inbound
/// frames into the session.
async fn handle_peer(mut socket: WebSocket, state: AppState, id: String, read_only: bool) {
    let Some((peer_id, mut frames)) = state.manager.attach(&id).await else {
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: 1011,
                reason: "Connection not ready".into(),
            })))
            .await;
        return;
    };
    debug!("connection {id}: peer {peer_id} attached (read_only={read_only})");

    let (mut sink, mut stream) = socket.split();

    // Banner to the newly-attached peer only.
    let _ = sink.send(Message::Text("\r\n[attached]\r\n".into())).await;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(PeerFrame::Output(bytes)) => {
                        if sink.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(PeerFrame::Text(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(PeerFrame::Close { code, reason }) => {
                        let _ = sink
                            .send(Message::Close(Some(CloseFrame {
                                code,
                                reason: reason.into(),
                            })))
                            .await;
                        break;
                    }
                    // Session terminated and dropped the queue.
                    None => break,
                }
            }
            inbound = stream.next() => {
                let Some(Ok(message)) = inbound else { break };
                match message {
                    Message::Text(text) => {
                        match parse_control_frame(text.as_str()) {
                            Some(ControlFrame::Resize { cols, rows }) => {
                                if read_only {
                                    state.manager.touch(&id).await;
                                } else {
                                    let _ = state.manager.resize(&id, cols, rows).await;
                                }
                            }
                            Some(ControlFrame::Stdin(data)) => {
                                if read_only {
                                    state.manager.touch(&id).await;
                                } else {
                                    state.manager.write_stdin(&id, data.into_bytes()).await;
                                }
                            }
                            Some(ControlFrame::Ping) => {
                                state.manager.touch(&id).await;
                                // Write errors here are the peer's problem.
                                let _ = sink
                                    .send(Message::Text(r#"{"type":"pong"}"#.into()))
                                    .await;
                            }
                            Some(ControlFrame::Detach) => {
                                state.manager.touch(&id).await;
                                let _ = sink
                                    .send(Message::Close(Some(CloseFrame {
                                        code: 1000,
                                        reason: "Detached".into(),
                                    })))
                                    .await;
                                break;
                            }
                            Some(ControlFrame::Ignored) => {
                                state.manager.touch(&id).await;
                            }
                            None => {
                                if read_only {
                                    state.manager.touch(&id).await;
                                } else {
                                    state
                                        .manager
                                        .write_stdin(&id, text.as_bytes().to_vec())
                                        .await;
                                }
                            }
                        }
                    }
                    Message::Binary(bytes) => {
                        if read_only {
                            state.manager.touch(&id).await;
                        } else {
                            state.manager.write_stdin(&id, bytes.to_vec()).await;
                        }
                    }
                    Message::Close(_) => break,
                    // Protocol ping/pong is answered by the transport.
                    _ => {}
                }
            }
        }
    }

    state.manager.detach(&id, peer_id).await;
    debug!("connection {id}: peer {peer_id} detached");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_frame_with_finite_dims() {
        assert_eq!(
            parse_control_frame(r#"{"type":"resize","cols":200,"rows":50}"#),
            Some(ControlFrame::Resize {
                cols: 200,
                rows: 50
            })
        );
    }

    #[test]
    fn resize_frame_with_bad_dims_is_consumed_not_forwarded() {
        assert_eq!(
            parse_control_frame(r#"{"type":"resize","cols":"wide"}"#),
            Some(ControlFrame::Ignored)
        );
        assert_eq!(
            parse_control_frame(r#"{"type":"resize"}"#),
            Some(ControlFrame::Ignored)
        );
    }

    #[test]
    fn oversized_dims_saturate() {
        assert_eq!(
            parse_control_frame(r#"{"type":"resize","cols":1e9,"rows":40}"#),
            Some(ControlFrame::Resize {
                cols: u16::MAX,
                rows: 40
            })
        );
    }

    #[test]
    fn stdin_frame_coerces_data() {
        assert_eq!(
            parse_control_frame(r#"{"type":"stdin","data":"ls\n"}"#),
            Some(ControlFrame::Stdin("ls\n".into()))
        );
        assert_eq!(
            parse_control_frame(r#"{"type":"stdin"}"#),
            Some(ControlFrame::Stdin(String::new()))
        );
        assert_eq!(
            parse_control_frame(r#"{"type":"stdin","data":null}"#),
            Some(ControlFrame::Stdin(String::new()))
        );
        assert_eq!(
            parse_control_frame(r#"{"type":"stdin","data":42}"#),
            Some(ControlFrame::Stdin("42".into()))
        );
    }

    #[test]
    fn ping_and_detach() {
        assert_eq!(
            parse_control_frame(r#"{"type":"ping"}"#),
            Some(ControlFrame::Ping)
        );
        assert_eq!(
            parse_control_frame(r#"  {"type":"detach"}  "#),
            Some(ControlFrame::Detach)
        );
    }

    #[test]
    fn non_control_payloads_pass_through_raw() {
        // Plain text.
        assert_eq!(parse_control_frame("ls -la\n"), None);
        // JSON object whose type is not one of the four control shapes.
        assert_eq!(parse_control_frame(r#"{"type":"reboot"}"#), None);
        // Braces but not JSON.
        assert_eq!(parse_control_frame("{not json}"), None);
        // Valid JSON without a string type.
        assert_eq!(parse_control_frame(r#"{"cols":80}"#), None);
        assert_eq!(parse_control_frame(r#"{"type":7}"#), None);
        // JSON that is not an object.
        assert_eq!(parse_control_frame(r#""hello""#), None);
    }
}
