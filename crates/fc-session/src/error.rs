//! Error taxonomy for the session boundary.
//!
//! Only `SessionError` reaches callers. Transform and asset failures are
//! recovered where they happen and degrade into the result.

use thiserror::Error;

/// Failures surfaced to the caller of an operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("no visible node in selection: {0}")]
    Selection(String),
    #[error("plugin failed to load: {0}")]
    PluginLoad(String),
}

/// A single hook invocation that failed. Logged, never surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("hook `{hook}` threw: {message}")]
    Hook { hook: &'static str, message: String },
    #[error("plugin channel failed: {0}")]
    Channel(String),
    #[error("hook `{0}` returned an unusable value")]
    BadOutput(&'static str),
}

/// Export or upload failure for one asset. Logged, never surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("export of {0} failed: {1}")]
    Export(String, String),
    #[error("upload of {0} failed: {1}")]
    Upload(String, String),
    #[error("image bytes for {0} unavailable")]
    MissingBytes(String),
}
