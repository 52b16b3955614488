//! ## Exporter Error Module
//!
//! Defines the error kinds used throughout the exporter.
//!
//! Component loops never bubble errors up to the supervisor; they convert
//! failures into log lines or status messages and keep running. The kinds
//! here exist so that call sites can tell apart the classes that change
//! control flow: cancellation, folder/auth misclassification, and hard
//! not-found responses from Jenkins.

use std::fmt::{self, Formatter};

use ext_config::ConfigError;

/// Represents various errors that can occur in the exporter.
#[derive(Debug)]
pub enum ExporterErrorKind {
    /// I/O-related error.
    Io(std::io::Error),
    /// Error from the outbound HTTP client.
    Http(reqwest::Error),
    /// Error decoding a JSON body.
    Json(serde_json::Error),
    /// Error from the embedded catalogue store.
    Storage(rusqlite::Error),
    /// Error loading the configuration file.
    Config(ConfigError),
    /// Invalid configuration value caught during validation.
    InvalidConfiguration(String),
    /// Error resolving a secret indirection (`file://`, `base64://`).
    Secret(String),
    /// Jenkins answered 404 for a job path.
    JobNotFound(String),
    /// The path names a folder where a buildable job was expected.
    FolderNotJob(String),
    /// Jenkins returned a non-JSON (typically HTML) body. Usually a folder
    /// endpoint or an authentication redirect rather than a real job.
    NonJsonResponse(String),
    /// Error when sending a message through an async channel.
    ChannelSend(String),
    /// The ambient cancellation token fired mid-operation.
    Cancelled,
    /// Custom error message.
    Custom(String),
}

impl ExporterErrorKind {
    /// True when the operation was interrupted by shutdown rather than
    /// failing on its own.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for the folder/auth misclassification class: the job endpoint
    /// did not behave like a job. The collector skips these without
    /// failing the cycle; ownership of the catalogue entry stays with
    /// discovery.
    pub fn is_folder_like(&self) -> bool {
        matches!(self, Self::FolderNotJob(_) | Self::NonJsonResponse(_))
    }

    /// True when Jenkins reported the job path as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound(_))
    }
}

impl fmt::Display for ExporterErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        use ExporterErrorKind::*;
        match self {
            Io(e) => write!(f, "I/O error: `{e}`"),
            Http(e) => write!(f, "HTTP error: `{e}`"),
            Json(e) => write!(f, "JSON decode error: `{e}`"),
            Storage(e) => write!(f, "Catalogue error: `{e}`"),
            Config(e) => write!(f, "Configuration error: `{e}`"),
            InvalidConfiguration(e) => write!(f, "Invalid configuration: {e}"),
            Secret(e) => write!(f, "Secret resolution error: {e}"),
            JobNotFound(path) => write!(f, "Job not found: {path}"),
            FolderNotJob(path) => write!(f, "Path is a folder, not a job: {path}"),
            NonJsonResponse(url) => {
                write!(f, "Non-JSON response (folder or auth problem?) from {url}")
            }
            ChannelSend(e) => write!(f, "Channel send failed: `{e}`"),
            Cancelled => write!(f, "Operation cancelled"),
            Custom(e) => write!(f, "{e}"),
        }
    }
}

impl From<std::io::Error> for ExporterErrorKind {
    fn from(e: std::io::Error) -> Self {
        ExporterErrorKind::Io(e)
    }
}

impl From<reqwest::Error> for ExporterErrorKind {
    fn from(e: reqwest::Error) -> Self {
        ExporterErrorKind::Http(e)
    }
}

impl From<serde_json::Error> for ExporterErrorKind {
    fn from(e: serde_json::Error) -> Self {
        ExporterErrorKind::Json(e)
    }
}

impl From<rusqlite::Error> for ExporterErrorKind {
    fn from(e: rusqlite::Error) -> Self {
        ExporterErrorKind::Storage(e)
    }
}

impl From<ConfigError> for ExporterErrorKind {
    fn from(e: ConfigError) -> Self {
        ExporterErrorKind::Config(e)
    }
}

impl From<prometheus::Error> for ExporterErrorKind {
    fn from(e: prometheus::Error) -> Self {
        ExporterErrorKind::Custom(format!("metric registry error: {e}"))
    }
}

impl From<String> for ExporterErrorKind {
    fn from(e: String) -> Self {
        ExporterErrorKind::Custom(e)
    }
}

impl<T: std::fmt::Debug> From<async_channel::SendError<T>> for ExporterErrorKind {
    fn from(e: async_channel::SendError<T>) -> Self {
        ExporterErrorKind::ChannelSend(format!("{e:?}"))
    }
}
