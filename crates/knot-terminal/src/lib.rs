//! Knot Terminal - persistent per-user interactive shell sessions
//!
//! A session outlives the network connection that created it: output keeps
//! accumulating in a bounded replay buffer while no client is attached, and a
//! reconnecting client receives that history before any new output.
//!
//! - [`ProcessHandle`]: one spawned process and its event stream
//! - [`SessionBuffer`]: bounded replay history
//! - [`Session`]: process + buffer + at most one attached connection
//! - [`SessionRegistry`]: one session per user, serialized per user
//! - [`ShutdownCoordinator`]: kills and drains everything on shutdown

#![forbid(unsafe_code)]

pub mod buffer;
pub mod drain;
pub mod error;
pub mod process;
pub mod registry;
pub mod session;

pub use buffer::{SessionBuffer, DEFAULT_BUFFER_CAPACITY};
pub use drain::{DrainReport, ShutdownCoordinator, DEFAULT_GRACE_PERIOD};
pub use error::{RegistryError, SpawnError, WriteError};
pub use process::{
    ExitReason, OutputChunk, OutputSource, ProcessEvent, ProcessEvents, ProcessHandle,
    ProcessSpec,
};
pub use registry::{AttachKind, Attached, SessionRegistry};
pub use session::{
    outbound_capacity, AttachError, CloseReason, ConnectionId, Outbound, Session, SessionEvent,
    SessionState, SessionStatus, OUTBOUND_HEADROOM,
};
