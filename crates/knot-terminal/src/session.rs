//! One user's interactive process and its connection binding.
//!
//! A `Session` owns its `ProcessHandle` and `SessionBuffer`. A connection is
//! only ever referenced through the sending half of its outbound channel, so
//! the session never controls how long a connection lives.
//!
//! State transitions:
//!
//! ```text
//! Starting ──attach──▶ Attached ◀──attach── Detached
//!                         │ detach ──────────▶ │
//!                         ▼                    ▼
//!                    Terminating ─────────▶ Gone
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use knot_core::UserIdentity;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::buffer::SessionBuffer;
use crate::error::WriteError;
use crate::process::{ExitReason, OutputChunk, ProcessEvent, ProcessEvents, ProcessHandle};

/// Identifies one network connection
pub type ConnectionId = Uuid;

/// Sending half of a connection's bounded outbound queue
pub type Outbound = mpsc::Sender<SessionEvent>;

/// Room left in an outbound queue beyond a full replay
pub const OUTBOUND_HEADROOM: usize = 256;

/// Queue size for a connection to a session buffering `buffer_capacity`
/// chunks. A connection that falls this far behind is detached.
pub fn outbound_capacity(buffer_capacity: usize) -> usize {
    buffer_capacity.saturating_add(OUTBOUND_HEADROOM)
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Attached,
    Detached,
    Terminating,
    Gone,
}

/// Why a connection is being closed by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The process exited, was killed, or its streams failed
    ProcessExited(ExitReason),
    /// A newer connection for the same user took over
    Replaced,
}

/// Delivered to the attached connection, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Output(OutputChunk),
    /// Non-fatal problem; the connection stays open
    Notice(String),
    /// Last event; the connection must close after delivering it
    Closed(CloseReason),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Why an attach was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// Another connection is attached (caller decides whether to preempt)
    AlreadyAttached,
    /// The session is terminating or gone
    Gone,
    /// The new connection's outbound queue is already closed
    ConnectionClosed,
}

/// Point-in-time view for APIs and logs
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: Uuid,
    pub user: UserIdentity,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub buffered_chunks: usize,
    pub attached: bool,
    pub created_at: DateTime<Utc>,
}

struct Attachment {
    connection_id: ConnectionId,
    outbound: Outbound,
}

struct Inner {
    state: SessionState,
    buffer: SessionBuffer,
    attachment: Option<Attachment>,
}

pub struct Session {
    id: Uuid,
    identity: UserIdentity,
    created_at: DateTime<Utc>,
    process: ProcessHandle,
    inner: Mutex<Inner>,
    closed: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Bind a freshly spawned process to `identity` and start relaying its
    /// output. The session starts in `Starting` with no connection.
    pub fn start(
        identity: UserIdentity,
        process: ProcessHandle,
        events: ProcessEvents,
        buffer_capacity: usize,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            identity,
            created_at: Utc::now(),
            process,
            inner: Mutex::new(Inner {
                state: SessionState::Starting,
                buffer: SessionBuffer::new(buffer_capacity),
                attachment: None,
            }),
            closed: CancellationToken::new(),
        });

        info!(
            session_id = %session.id,
            user = %session.identity,
            pid = ?session.process.pid(),
            "Terminal session started"
        );

        tokio::spawn(Arc::clone(&session).relay(events));
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Process running and session not on its way out
    pub fn is_alive(&self) -> bool {
        let state = self.state();
        !matches!(state, SessionState::Terminating | SessionState::Gone)
            && !self.process.is_exited()
    }

    pub fn status(&self) -> SessionStatus {
        let inner = self.lock();
        SessionStatus {
            session_id: self.id,
            user: self.identity.clone(),
            state: inner.state,
            pid: self.process.pid(),
            buffered_chunks: inner.buffer.len(),
            attached: inner.attachment.is_some(),
            created_at: self.created_at,
        }
    }

    /// Copy of the replay history
    pub fn snapshot(&self) -> Vec<OutputChunk> {
        self.lock().buffer.snapshot()
    }

    /// Bind a connection. Replays the buffer into `outbound` before any later
    /// output can be relayed, then returns the number of replayed chunks.
    pub fn attach(
        &self,
        connection_id: ConnectionId,
        outbound: Outbound,
    ) -> Result<usize, AttachError> {
        let mut inner = self.lock();
        match inner.state {
            SessionState::Terminating | SessionState::Gone => return Err(AttachError::Gone),
            SessionState::Attached => return Err(AttachError::AlreadyAttached),
            SessionState::Starting | SessionState::Detached => {}
        }

        if outbound.is_closed() {
            return Err(AttachError::ConnectionClosed);
        }

        // Holding the lock keeps the relay from interleaving live output.
        // A queue smaller than the buffer gets the most recent chunks.
        let snapshot = inner.buffer.snapshot();
        let skip = snapshot.len().saturating_sub(outbound.capacity());
        let mut replayed = 0;
        for chunk in &snapshot[skip..] {
            match outbound.try_send(SessionEvent::Output(chunk.clone())) {
                Ok(()) => replayed += 1,
                Err(TrySendError::Closed(_)) => return Err(AttachError::ConnectionClosed),
                Err(TrySendError::Full(_)) => break,
            }
        }

        inner.attachment = Some(Attachment {
            connection_id,
            outbound,
        });
        inner.state = SessionState::Attached;

        info!(
            session_id = %self.id,
            user = %self.identity,
            connection_id = %connection_id,
            replayed,
            "Connection attached"
        );
        Ok(replayed)
    }

    /// Unbind `connection_id`; the process keeps running. Ignored when a
    /// different connection (or none) is attached.
    pub fn detach(&self, connection_id: ConnectionId) -> bool {
        let mut inner = self.lock();
        let matches = inner
            .attachment
            .as_ref()
            .is_some_and(|a| a.connection_id == connection_id);
        if !matches {
            return false;
        }

        inner.attachment = None;
        if inner.state == SessionState::Attached {
            inner.state = SessionState::Detached;
        }
        info!(
            session_id = %self.id,
            user = %self.identity,
            connection_id = %connection_id,
            "Connection detached, process kept alive"
        );
        true
    }

    /// Forward one client message to the process, newline-terminated.
    pub async fn write_input(
        &self,
        connection_id: ConnectionId,
        message: &[u8],
    ) -> Result<(), WriteError> {
        {
            let inner = self.lock();
            let attached = inner
                .attachment
                .as_ref()
                .is_some_and(|a| a.connection_id == connection_id);
            if !attached {
                return Err(WriteError::NotAttached);
            }
        }

        if message.ends_with(b"\n") {
            self.process.write(message).await
        } else {
            let mut line = Vec::with_capacity(message.len() + 1);
            line.extend_from_slice(message);
            line.push(b'\n');
            self.process.write(&line).await
        }
    }

    /// Send a non-fatal notice to the attached connection, if any
    pub fn notify(&self, message: impl Into<String>) {
        let inner = self.lock();
        if let Some(attachment) = &inner.attachment {
            let _ = attachment
                .outbound
                .try_send(SessionEvent::Notice(message.into()));
        }
    }

    /// Kill the process. The session becomes `Gone` once the exit is observed.
    pub fn terminate(&self) {
        self.process.terminate();
    }

    /// Hand the user over to a new connection: the attached connection gets a
    /// `Replaced` close, and the process is killed with its buffered output.
    pub fn preempt(&self) {
        let discarded = {
            let mut inner = self.lock();
            if let Some(attachment) = inner.attachment.take() {
                let _ = attachment
                    .outbound
                    .try_send(SessionEvent::Closed(CloseReason::Replaced));
            }
            if !matches!(inner.state, SessionState::Gone) {
                inner.state = SessionState::Terminating;
            }
            inner.buffer.len()
        };

        warn!(
            session_id = %self.id,
            user = %self.identity,
            discarded_chunks = discarded,
            "Session preempted by a new connection; buffered output discarded"
        );
        self.process.terminate();
    }

    /// Resolves once the session is `Gone`
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    async fn relay(self: Arc<Self>, mut events: ProcessEvents) {
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Output(chunk) => self.publish(chunk),
                ProcessEvent::Exited(reason) => {
                    self.finish(reason);
                    return;
                }
            }
        }
        self.finish(ExitReason::Failed {
            message: "process event stream ended".to_string(),
        });
    }

    fn publish(&self, chunk: OutputChunk) {
        let mut inner = self.lock();
        inner.buffer.append(chunk.clone());

        let Some(attachment) = &inner.attachment else {
            return;
        };
        match attachment.outbound.try_send(SessionEvent::Output(chunk)) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => {
                // The chunk is buffered; the client gets it on reattach.
                warn!(
                    session_id = %self.id,
                    connection_id = %attachment.connection_id,
                    "Connection fell behind the process output, detaching"
                );
            }
            Err(TrySendError::Closed(_)) => {
                // Receiver dropped without a detach; treat as disconnected.
                debug!(session_id = %self.id, "Attached connection gone, detaching");
            }
        }
        inner.attachment = None;
        if inner.state == SessionState::Attached {
            inner.state = SessionState::Detached;
        }
    }

    fn finish(&self, reason: ExitReason) {
        {
            let mut inner = self.lock();
            inner.state = SessionState::Terminating;
            if let Some(attachment) = inner.attachment.take() {
                let _ = attachment
                    .outbound
                    .try_send(SessionEvent::Closed(CloseReason::ProcessExited(reason.clone())));
            }
            inner.state = SessionState::Gone;
        }

        info!(
            session_id = %self.id,
            user = %self.identity,
            reason = %reason,
            "Terminal session ended"
        );
        self.closed.cancel();
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
