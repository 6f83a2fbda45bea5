// src/utils/error.rs
use std::time::Duration;
use thiserror::Error;

// Define specific error types for different parts of the application
#[derive(Error, Debug)]
pub enum NavigationError {
    #[error("Invalid URL '{0}'")]
    InvalidUrl(String),

    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode), // e.g., 404 Not Found, 500

    #[error("Request blocked by the site (HTTP {0})")]
    Blocked(reqwest::StatusCode), // 403 / 429

    #[error("Navigation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Page is empty or nearly empty ({0} chars)")]
    EmptyPage(usize),
}

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Expression could not be parsed: {0}")]
    InvalidExpression(String),

    #[error("Page is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Oracle endpoint not configured")]
    MissingEndpoint,

    #[error("Oracle HTTP error: {0}")]
    Http(String),

    #[error("Oracle returned an invalid payload: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Failures raised inside a single state handler. The driver converts each
/// of these into an escalation event or a terminal result.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("Navigation failed: {0}")]
    Navigation(#[from] NavigationError),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Selector store error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("Navigator setup failed: {0}")]
    Navigation(#[from] NavigationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Output serialization failed: {0}")]
    Output(#[from] serde_json::Error),

    #[error("Data processing failed: {0}")]
    Processing(String),
}
