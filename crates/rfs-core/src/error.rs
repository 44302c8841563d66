//! Error types for the rfs protocol

use thiserror::Error;

/// Protocol-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Missing command or path")]
    MissingCommandOrPath,

    #[error("Unrecognized command")]
    UnrecognizedCommand(String),

    #[error("missing size line")]
    MissingSize,

    #[error("invalid file size: {0:?}")]
    InvalidSize(String),

    #[error("path rejected: {0}")]
    PathTraversal(String),

    #[error("File is read-only")]
    ReadOnly,
}

impl ProtocolError {
    /// Whether a response line can still be sent for this error.
    ///
    /// Size errors happen mid-request, after the client has started
    /// streaming, so the connection is dropped without a reply.
    pub fn is_answerable(&self) -> bool {
        !matches!(self, ProtocolError::MissingSize | ProtocolError::InvalidSize(_))
    }
}
