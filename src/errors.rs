//! Error types for the S3 transport method.
//!
//! [`MethodError`] covers every way handling a single message can fail.
//! Only [`MethodError::NotFound`] is recoverable (it becomes a
//! `400 URI Failure`); everything else is wrapped into a [`FatalError`],
//! which the engine reports as `401 General Failure` before the process
//! exits.

use thiserror::Error;

/// Failures raised while parsing, resolving or fetching a request.
#[derive(Debug, Error)]
pub enum MethodError {
    /// The raw text could not be parsed into a message.
    #[error("invalid message: {reason}")]
    Parse { reason: String },

    /// A URI could not be decomposed into bucket and key.
    #[error("cannot resolve location {uri}: {reason}")]
    Resolution { uri: String, reason: String },

    /// A message lacks a field the handler requires.
    #[error("{message} message missing required field: {field}")]
    MissingField {
        message: &'static str,
        field: String,
    },

    /// The backend reports the object does not exist.
    #[error("object s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    /// Any other backend or filesystem failure.
    #[error("{0:#}")]
    Transfer(#[from] anyhow::Error),
}

impl MethodError {
    /// Short machine-readable name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            MethodError::Parse { .. } => "Parse",
            MethodError::Resolution { .. } => "Resolution",
            MethodError::MissingField { .. } => "MissingField",
            MethodError::NotFound { .. } => "NotFound",
            MethodError::Transfer(_) => "Transfer",
        }
    }

    /// Whether a handler can answer this error itself instead of aborting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MethodError::NotFound { .. })
    }
}

impl From<std::io::Error> for MethodError {
    fn from(err: std::io::Error) -> Self {
        MethodError::Transfer(anyhow::Error::new(err))
    }
}

/// An error that must terminate the whole process.
///
/// APT expects the method to die on unrecoverable failures, so these are
/// never retried or answered per request.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct FatalError(#[from] pub MethodError);

impl FatalError {
    /// Text for the `Message` field of a General Failure.
    pub fn failure_text(&self) -> String {
        self.0.to_string().replace('\n', " ")
    }
}
