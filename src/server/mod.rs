//! Server module for Knot
//!
//! Contains the main server initialization and runtime logic.
//!
//! # Module Structure
//!
//! - `config`: Configuration structures
//! - `loader`: Configuration loading from files and environment
//! - `validation`: Configuration validation
//! - `init`: Main server initialization and run loop

pub mod config;
pub mod init;
mod loader;
mod validation;

// Re-export public API
pub use init::run;
