//! Error types for the client.

use crate::save::SaveResult;
use crate::transport::TransportFailure;
use http::StatusCode;
use odata_protocol::{ProtocolError, ResponseMessage};
use odata_tracking::TrackingError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Change tracking rejected the operation.
    #[error(transparent)]
    Tracking(#[from] TrackingError),

    /// Version or format negotiation failed, or a response violated the
    /// protocol ceiling.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Settings are inconsistent.
    #[error("invalid settings: {message}")]
    InvalidSettings {
        /// Error message.
        message: String,
    },

    /// Save options are inconsistent with each other or with the settings.
    #[error("invalid save options: {message}")]
    InvalidSaveOptions {
        /// Error message.
        message: String,
    },

    /// Both the legacy and the modern sending-request hook were registered.
    #[error("event registration conflict: {message}")]
    EventConflict {
        /// Error message.
        message: String,
    },

    /// A URI could not be resolved.
    #[error("uri error: {message}")]
    Uri {
        /// Error message.
        message: String,
    },

    /// The payload serializer failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// The transport failed to deliver a request.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Partial response, if the transport obtained one.
        response: Option<Box<ResponseMessage>>,
    },

    /// The server answered a query with a failure status.
    #[error("request failed with status {status}: {message}")]
    RequestFailed {
        /// Response status.
        status: StatusCode,
        /// Response body, lossily decoded.
        message: String,
    },

    /// At least one change was rejected. Carries every response received.
    #[error("save failed: {} of {} changes failed", .0.failed().count(), .0.responses.len())]
    SaveFailed(Box<SaveResult>),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Creates an invalid settings error.
    pub fn invalid_settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: message.into(),
        }
    }

    /// Creates an invalid save options error.
    pub fn invalid_save_options(message: impl Into<String>) -> Self {
        Self::InvalidSaveOptions {
            message: message.into(),
        }
    }

    /// Creates a URI error.
    pub fn uri(message: impl Into<String>) -> Self {
        Self::Uri {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a transport error with no partial response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            response: None,
        }
    }

    /// Returns true for failures detected locally, without a server
    /// rejecting anything.
    ///
    /// Protocol errors count as local even when raised after a response
    /// arrived: they are ceiling violations, not server failures.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Tracking(_)
                | Self::Protocol(_)
                | Self::InvalidSettings { .. }
                | Self::InvalidSaveOptions { .. }
                | Self::EventConflict { .. }
                | Self::Uri { .. }
                | Self::Serialization { .. }
        )
    }
}

impl From<TransportFailure> for ClientError {
    fn from(failure: TransportFailure) -> Self {
        Self::Transport {
            message: failure.message,
            response: failure.response.map(Box::new),
        }
    }
}
