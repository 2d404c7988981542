//! # OData Protocol
//!
//! Wire-level vocabulary for the OData client.
//!
//! This crate provides:
//! - `ProtocolVersion` and request version computation
//! - Format negotiation (Atom, JSON verbose, JSON light)
//! - A case-insensitive header collection with the only-raise version rule
//! - Transport-agnostic request and response messages
//! - Multipart batch framing
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod error;
mod format;
mod headers;
mod message;
mod version;

pub use batch::{BatchItemResponse, BatchReader, BatchWriter};
pub use error::{ProtocolError, ProtocolResult};
pub use format::{media_types, FormatNegotiator, MetadataLevel, ODataFormat, PayloadKind, ServiceModel};
pub use headers::{names, HeaderCollection};
pub use message::{merge_method, RequestMessage, ResponseMessage};
pub use version::{ProtocolVersion, RequestShape};
