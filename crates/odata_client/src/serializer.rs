//! Payload serializer abstraction.
//!
//! Entry and link payloads are produced and consumed outside the core.
//! Implementations report failures as plain messages; the client wraps
//! them in [`ClientError::Serialization`](crate::ClientError).

use bytes::Bytes;
use odata_protocol::ResponseMessage;
use odata_tracking::{EntityDescriptor, EntryMetadata, MaterializedEntry};

/// Reads and writes entity payloads for a negotiated media type.
pub trait PayloadSerializer: Send + Sync {
    /// Serializes the properties of a tracked entity.
    fn write_entry(&self, descriptor: &EntityDescriptor, content_type: &str)
        -> Result<Bytes, String>;

    /// Serializes a `$links` payload pointing at `target_uri`.
    fn write_link(&self, target_uri: &str, content_type: &str) -> Result<Bytes, String>;

    /// Reads the server metadata of a single entry response.
    fn read_entry(&self, response: &ResponseMessage) -> Result<EntryMetadata, String>;

    /// Materializes the entries of an entry or feed response.
    fn read_entries(&self, response: &ResponseMessage) -> Result<Vec<MaterializedEntry>, String>;
}
