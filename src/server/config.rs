//! Server configuration types
//!
//! Mirrors the sections of `config/default.toml`.

use std::path::PathBuf;
use std::time::Duration;

use knot_terminal::{ProcessSpec, DEFAULT_BUFFER_CAPACITY};
use serde::{Deserialize, Serialize};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            cors_origins: Vec::new(),
        }
    }
}

/// Credentials accepted by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

/// One accepted token, stored as its SHA-256 digest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub user: String,
    pub token_sha256: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// Interactive process and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// WebSocket path
    #[serde(default = "default_path")]
    pub path: String,
    /// Program to run; empty selects the platform shell
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Starting directory; defaults to the home directory
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Output chunks kept for replay
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// How long shutdown waits for each process to exit
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            program: String::new(),
            args: Vec::new(),
            working_dir: None,
            buffer_capacity: default_buffer_capacity(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl TerminalConfig {
    /// Resolve the process to spawn for every new session
    pub fn process_spec(&self) -> ProcessSpec {
        let (program, args) = if self.program.trim().is_empty() {
            platform_shell()
        } else {
            (self.program.clone(), self.args.clone())
        };

        let spec = ProcessSpec::new(program).args(args);
        match self.working_dir.clone().or_else(home_dir) {
            Some(dir) => spec.working_dir(dir),
            None => spec,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn default_path() -> String {
    "/terminal".to_string()
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

#[cfg(windows)]
fn platform_shell() -> (String, Vec<String>) {
    (
        "powershell.exe".to_string(),
        vec!["-NoLogo".to_string(), "-NoExit".to_string()],
    )
}

#[cfg(not(windows))]
fn platform_shell() -> (String, Vec<String>) {
    let shell = std::env::var("SHELL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string());
    (shell, vec!["-i".to_string()])
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
