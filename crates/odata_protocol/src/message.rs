//! Transport-agnostic request and response messages.

use crate::error::{ProtocolError, ProtocolResult};
use crate::headers::{names, HeaderCollection};
use crate::version::ProtocolVersion;
use bytes::Bytes;
use http::{Method, StatusCode};

/// The `MERGE` method used for partial updates before `PATCH` existed.
#[must_use]
pub fn merge_method() -> Method {
    // a valid token; from_bytes only rejects invalid ones
    Method::from_bytes(b"MERGE").unwrap_or(Method::PATCH)
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    /// HTTP method.
    pub method: Method,
    /// Absolute URI, or a `$<Content-ID>` reference inside a changeset.
    pub uri: String,
    /// Headers in wire order.
    pub headers: HeaderCollection,
    /// Buffered body.
    pub body: Bytes,
}

impl RequestMessage {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: HeaderCollection::new(),
            body: Bytes::new(),
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    /// Status code.
    pub status: StatusCode,
    /// Headers in wire order.
    pub headers: HeaderCollection,
    /// Buffered body.
    pub body: Bytes,
}

impl ResponseMessage {
    /// Creates a response with no headers and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderCollection::new(),
            body: Bytes::new(),
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// `Location` header.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.header(names::LOCATION)
    }

    /// `ETag` header.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.header(names::ETAG)
    }

    /// Fails if the declared `DataServiceVersion` exceeds `ceiling`.
    ///
    /// A response without the header is accepted.
    pub fn validate_version(&self, ceiling: ProtocolVersion) -> ProtocolResult<()> {
        match self.headers.data_service_version()? {
            Some(version) if version > ceiling => {
                Err(ProtocolError::ResponseVersionTooHigh { version, ceiling })
            }
            _ => Ok(()),
        }
    }
}
