//! Terminal WebSocket connection handling
//!
//! Each connection runs two independent directions: an outbound task that
//! drains the session's event queue into the socket, and the inbound loop
//! that writes client frames to the process. Neither waits on the other.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use knot_core::UserIdentity;
use knot_terminal::{
    AttachKind, ConnectionId, ProcessHandle, RegistryError, Session, SessionEvent, WriteError,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::{write_failure_notice, FrameFormat, ServerMessage};
use super::TerminalState;

/// Normal closure
const CLOSE_NORMAL: u16 = 1000;
/// Server is shutting down or the session was replaced
const CLOSE_GOING_AWAY: u16 = 1001;
/// Session could not be created
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Handle one upgraded terminal connection for `identity`
pub async fn handle_socket(
    socket: WebSocket,
    state: TerminalState,
    identity: UserIdentity,
    format: FrameFormat,
) {
    let _guard = state.shutdown.track_connection();
    let connection_id = Uuid::new_v4();
    info!(user = %identity, connection_id = %connection_id, "Terminal connection established");

    let (mut sender, receiver) = socket.split();
    let (outbound_tx, outbound_rx) =
        mpsc::channel::<SessionEvent>(state.registry.outbound_capacity());

    let spec = Arc::clone(&state.spec);
    let attached = state
        .registry
        .connect(&identity, connection_id, outbound_tx.clone(), || {
            ProcessHandle::spawn(&spec)
        })
        .await;

    let attached = match attached {
        Ok(attached) => attached,
        Err(e) => {
            reject(&mut sender, &identity, format, e).await;
            return;
        }
    };

    let (resumed, replayed) = match attached.kind {
        AttachKind::Resumed { replayed } => (true, replayed),
        AttachKind::Created | AttachKind::Replaced => (false, 0),
    };
    info!(
        user = %identity,
        connection_id = %connection_id,
        session_id = %attached.session.id(),
        kind = ?attached.kind,
        replayed,
        "Terminal connection attached"
    );

    // Replayed chunks are already queued; this frame goes out ahead of them.
    let connected = ServerMessage::Connected {
        session_id: attached.session.id(),
        resumed,
        replayed,
    };
    if let Some(frame) = connected.render(format) {
        if sender.send(Message::Text(frame)).await.is_err() {
            attached.session.detach(connection_id);
            return;
        }
    }

    let mut writer = tokio::spawn(write_outbound(sender, outbound_rx, format));
    // The session holds the only sender from here on, so the writer ends
    // once the session lets go of this connection.
    drop(outbound_tx);

    let cancel = state.shutdown.token();
    read_inbound(receiver, &attached.session, connection_id, &mut writer, &cancel).await;

    if attached.session.detach(connection_id) {
        debug!(connection_id = %connection_id, "Detached after client went away");
    }
    if !writer.is_finished() {
        writer.abort();
    }

    info!(user = %identity, connection_id = %connection_id, "Terminal connection ended");
}

/// Forward client frames to the process until the client leaves or the
/// outbound side closes the connection
async fn read_inbound(
    mut receiver: SplitStream<WebSocket>,
    session: &Arc<Session>,
    connection_id: ConnectionId,
    writer: &mut tokio::task::JoinHandle<()>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            msg = receiver.next() => {
                let input = match msg {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection_id = %connection_id, "Client closed terminal connection");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "Terminal WebSocket error");
                        break;
                    }
                    None => break,
                };

                match session.write_input(connection_id, &input).await {
                    Ok(()) => {}
                    Err(WriteError::NotAttached) => {
                        debug!(connection_id = %connection_id, "Input from a connection no longer attached");
                        break;
                    }
                    Err(e) => {
                        debug!(connection_id = %connection_id, error = %e, "Failed to write terminal input");
                        session.notify(write_failure_notice(&e));
                    }
                }
            }
            _ = &mut *writer => break,
            _ = cancel.cancelled() => {
                debug!(connection_id = %connection_id, "Server shutting down, dropping connection");
                break;
            }
        }
    }
}

/// Drain session events into the socket; closes it after a terminal event,
/// or when the session drops a connection that fell behind
async fn write_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<SessionEvent>,
    format: FrameFormat,
) {
    while let Some(event) = events.recv().await {
        let message = ServerMessage::from_event(&event);
        if let Some(frame) = message.render(format) {
            if sender.send(Message::Text(frame)).await.is_err() {
                debug!("Terminal socket closed while sending");
                return;
            }
        }

        if event.is_terminal() {
            let code = match message {
                ServerMessage::Replaced => CLOSE_GOING_AWAY,
                _ => CLOSE_NORMAL,
            };
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code,
                    reason: "session ended".into(),
                })))
                .await;
            return;
        }
    }

    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_GOING_AWAY,
            reason: "detached".into(),
        })))
        .await;
}

/// Tell the client why no session is available, then close
async fn reject(
    sender: &mut SplitSink<WebSocket, Message>,
    identity: &UserIdentity,
    format: FrameFormat,
    err: RegistryError,
) {
    let (code, close_code) = match &err {
        RegistryError::Spawn(e) => {
            error!(user = %identity, error = %e, "Failed to start terminal session");
            ("SPAWN_FAILED", CLOSE_INTERNAL_ERROR)
        }
        RegistryError::Closed => ("SHUTTING_DOWN", CLOSE_GOING_AWAY),
        RegistryError::ConnectionClosed => return,
    };

    let message = ServerMessage::Error {
        message: err.to_string(),
        code: code.to_string(),
    };
    if let Some(frame) = message.render(format) {
        let _ = sender.send(Message::Text(frame)).await;
    }
    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code,
            reason: code.into(),
        })))
        .await;
}
