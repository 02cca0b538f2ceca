//! Error type shared by every layer of the library.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The child process closed its terminal while a match was pending.
    #[error("steamcmd exited unexpectedly")]
    SessionTerminated,

    /// No pattern matched within the configured read timeout.
    #[error("Timed out waiting for steamcmd output (last expected: {pattern})")]
    Timeout { pattern: String },

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Malformed metadata block: {message}")]
    Decode { message: String },

    #[error("No application matches '{0}'")]
    NotFound(String),

    /// A batch fetch produced fewer records than requested.
    #[error("Fetched {resolved} of {requested} records; the rest will be retried on the next run")]
    PartialFetch { requested: usize, resolved: usize },

    #[error("Installation of app {app_id} failed: {reason}")]
    InstallFailed { app_id: u32, reason: String },

    #[error("Missing required option: {0}")]
    MissingArgument(&'static str),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("IO error at '{path}': {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
        }
    }

    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Errors caused by user input rather than by steamcmd or the filesystem.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::MissingArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
