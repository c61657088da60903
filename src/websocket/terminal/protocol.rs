//! Terminal WebSocket protocol definitions
//!
//! Clients send raw text or binary frames; each frame is one line of input.
//! The server answers in one of two frame formats:
//!
//! - `text` (default): process output as-is, error output prefixed with
//!   `stderr: `, and bracketed notices such as `[Process exited with code 0]`
//! - `json`: tagged `ServerMessage` objects

use knot_terminal::{CloseReason, ExitReason, OutputSource, SessionEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frame format requested with `?format=`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Text,
    Json,
}

/// Query parameters of the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct TerminalParams {
    #[serde(default)]
    pub format: FrameFormat,
}

/// Terminal message to client
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Bound to a session (JSON only)
    Connected {
        session_id: Uuid,
        resumed: bool,
        replayed: usize,
    },
    /// Process output
    Output { stream: OutputSource, data: String },
    /// Non-fatal problem; the connection stays open
    Notice { message: String },
    /// The process ended; the connection closes next
    Exit {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        signal: Option<i32>,
        message: String,
    },
    /// Another connection took over this user's terminal
    Replaced,
    /// The session could not be created; the connection closes next
    Error { message: String, code: String },
}

impl ServerMessage {
    pub fn from_event(event: &SessionEvent) -> Self {
        match event {
            SessionEvent::Output(chunk) => ServerMessage::Output {
                stream: chunk.source,
                data: chunk.text().into_owned(),
            },
            SessionEvent::Notice(message) => ServerMessage::Notice {
                message: message.clone(),
            },
            SessionEvent::Closed(CloseReason::ProcessExited(reason)) => exit_message(reason),
            SessionEvent::Closed(CloseReason::Replaced) => ServerMessage::Replaced,
        }
    }

    /// Encode for the wire. `None` when the format has no frame for it.
    pub fn render(&self, format: FrameFormat) -> Option<String> {
        match format {
            FrameFormat::Json => serde_json::to_string(self).ok(),
            FrameFormat::Text => self.render_text(),
        }
    }

    fn render_text(&self) -> Option<String> {
        match self {
            ServerMessage::Connected { .. } => None,
            ServerMessage::Output {
                stream: OutputSource::Stdout,
                data,
            } => Some(data.clone()),
            ServerMessage::Output {
                stream: OutputSource::Stderr,
                data,
            } => Some(format!("stderr: {}", data)),
            ServerMessage::Notice { message } => Some(format!("{}\n", message)),
            ServerMessage::Exit {
                code: Some(code), ..
            } => Some(format!("\n[Process exited with code {}]", code)),
            ServerMessage::Exit {
                signal: Some(signal),
                ..
            } => Some(format!("\n[Process terminated by signal {}]", signal)),
            ServerMessage::Exit { message, .. } => {
                Some(format!("\n[Shell process error: {}]", message))
            }
            ServerMessage::Replaced => {
                Some("\n[Session taken over by another connection]".to_string())
            }
            ServerMessage::Error { message, .. } => {
                Some(format!("\n[Shell process error: {}]", message))
            }
        }
    }
}

fn exit_message(reason: &ExitReason) -> ServerMessage {
    match reason {
        ExitReason::Exited { code } => ServerMessage::Exit {
            code: Some(*code),
            signal: None,
            message: reason.to_string(),
        },
        ExitReason::Signaled { signal } => ServerMessage::Exit {
            code: None,
            signal: Some(*signal),
            message: reason.to_string(),
        },
        ExitReason::Failed { message } => ServerMessage::Exit {
            code: None,
            signal: None,
            message: message.clone(),
        },
    }
}

/// Notice text for input that could not be written
pub fn write_failure_notice(error: &impl std::fmt::Display) -> String {
    format!("Error processing command: {}", error)
}
