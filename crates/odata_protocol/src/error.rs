//! Error types for the protocol crate.

use crate::format::PayloadKind;
use crate::version::ProtocolVersion;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while negotiating or framing messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A version header value could not be parsed.
    #[error("invalid protocol version: {value:?}")]
    InvalidVersion {
        /// The raw header value.
        value: String,
    },

    /// The request needs a higher version than the client allows.
    #[error("request requires protocol version {required} but the maximum is {ceiling}")]
    VersionExceedsCeiling {
        /// Version required by the request.
        required: ProtocolVersion,
        /// Configured maximum.
        ceiling: ProtocolVersion,
    },

    /// The response declares a version above the client's maximum.
    #[error("response version {version} exceeds the maximum protocol version {ceiling}")]
    ResponseVersionTooHigh {
        /// Declared response version.
        version: ProtocolVersion,
        /// Configured maximum.
        ceiling: ProtocolVersion,
    },

    /// JSON was selected under a ceiling below V3.
    #[error("the JSON format requires protocol version 3.0, the maximum is {ceiling}")]
    JsonRequiresV3 {
        /// Configured maximum.
        ceiling: ProtocolVersion,
    },

    /// JSON payloads of this kind need a loaded service model.
    #[error("a service model is required to use JSON for {kind:?} payloads")]
    ServiceModelRequired {
        /// The payload kind.
        kind: PayloadKind,
    },

    /// A header could not be represented on the wire.
    #[error("invalid header {name}: {message}")]
    InvalidHeader {
        /// Header name.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// A batch body could not be written or read.
    #[error("invalid batch: {message}")]
    InvalidBatch {
        /// Description of the problem.
        message: String,
    },
}

impl ProtocolError {
    /// Creates an invalid version error.
    pub fn invalid_version(value: impl Into<String>) -> Self {
        Self::InvalidVersion {
            value: value.into(),
        }
    }

    /// Creates an invalid batch error.
    pub fn invalid_batch(message: impl Into<String>) -> Self {
        Self::InvalidBatch {
            message: message.into(),
        }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name: name.into(),
            message: message.into(),
        }
    }
}
