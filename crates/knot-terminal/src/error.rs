//! Error types for knot-terminal

use thiserror::Error;

/// The interactive process could not be started
#[derive(Debug, Error)]
pub enum SpawnError {
    /// Configured program is blank
    #[error("no program configured")]
    EmptyCommand,

    /// OS-level spawn failure (missing binary, bad working directory, ...)
    #[error("failed to spawn '{program}': {source}")]
    Io {
        /// Program that failed to start
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A standard stream was not piped
    #[error("child process has no {0} pipe")]
    MissingPipe(&'static str),
}

/// Input could not be delivered to the process
#[derive(Debug, Error)]
pub enum WriteError {
    /// The process already exited
    #[error("process has exited")]
    ProcessExited,

    /// The writing connection is not the one attached to the session
    #[error("connection is not attached to this session")]
    NotAttached,

    /// I/O failure on the process's stdin
    #[error("stdin write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry-level failure while resolving a session
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Spawning the replacement/new process failed
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    /// Shutdown has started; no new sessions are created
    #[error("session registry is closed")]
    Closed,

    /// The connection's outbound channel closed before attach completed
    #[error("connection closed before attach completed")]
    ConnectionClosed,
}
