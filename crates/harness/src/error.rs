//! Error types for the harness

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server exited before reporting its address ({0})")]
    ServerExited(String),

    #[error("Server did not report its address within {0:?}")]
    ServerReadyTimeout(Duration),

    #[error("Error when killing server process tree (pid: {pid}): {reason}")]
    ProcessKill { pid: u32, reason: String },

    #[error("Playwright not found. Install with: npm install playwright")]
    PlaywrightNotFound,

    #[error("Playwright driver error: {0}")]
    Driver(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Invalid auth cookie: {0}")]
    Cookie(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl HarnessError {
    /// Whether this error comes from the harness configuration rather than
    /// from a collaborator at runtime.
    pub fn is_config(&self) -> bool {
        matches!(self, HarnessError::MissingEnv(_) | HarnessError::Config(_))
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
