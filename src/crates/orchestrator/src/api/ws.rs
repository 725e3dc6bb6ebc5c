//! WebSocket session endpoint: the client's first frame submits a graph,
//! after which the connection is a one-way stream of server frames until
//! `executionComplete`/`executionError` or the client disconnects.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;

use crate::api::routes::AppState;
use crate::proto::{ClientFrame, ServerFrame};
use crate::session;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let first = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => continue,
            Some(Err(err)) => {
                tracing::warn!(error = %err, "websocket recv failed before graph submission");
                return;
            }
        }
    };

    let frame: ClientFrame = match serde_json::from_str(&first) {
        Ok(frame) => frame,
        Err(err) => {
            let error = ServerFrame::ExecutionError {
                kind: "invalid-graph".to_string(),
                message: format!("malformed submission: {err}"),
            };
            let _ = send(&mut socket, &error).await;
            return;
        }
    };

    let mut session = match session::start(frame, &state.upstreams, state.concurrency) {
        Ok(session) => session,
        Err(err) => {
            let error = ServerFrame::ExecutionError {
                kind: err.kind().to_string(),
                message: err.to_string(),
            };
            let _ = send(&mut socket, &error).await;
            return;
        }
    };

    loop {
        tokio::select! {
            frame = session.frames.recv() => {
                match frame {
                    Some(frame) => {
                        let done = matches!(
                            frame,
                            ServerFrame::ExecutionComplete { .. } | ServerFrame::ExecutionError { .. }
                        );
                        if send(&mut socket, &frame).await.is_err() {
                            session.cancellation.cancel();
                            break;
                        }
                        if done {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        session.cancellation.cancel();
                        break;
                    }
                    Some(Err(_)) => {
                        session.cancellation.cancel();
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }
}

async fn send(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).expect("ServerFrame always serializes");
    socket.send(Message::Text(text)).await
}
