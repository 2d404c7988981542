//! # OData Client
//!
//! Client engine for OData v1-v3 services.
//!
//! This crate provides:
//! - [`DataServiceContext`]: tracking operations, queries, stream reads and
//!   `save_changes` over a pluggable transport
//! - The request pipeline with building, sending and receiving events
//! - The save engine: per-change requests, atomic changeset batches and
//!   batches of independent operations
//! - Settings loadable from JSON and a per-version model cache
//!
//! Payload bodies are produced and read by a host-supplied
//! [`PayloadSerializer`]; bytes reach the wire through a [`Transport`] or
//! [`AsyncTransport`].
//!
//! ## Example
//!
//! ```rust,ignore
//! let settings = ClientSettings::new("http://host/svc/");
//! let mut ctx = DataServiceContext::new(settings, model, transport, serializer)?;
//! ctx.add_object("Customers", EntityRef::new(customer))?;
//! let result = ctx.save_changes(SaveChangesOptions::BATCH)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod error;
mod events;
mod model_cache;
mod pipeline;
mod save;
mod serializer;
mod transport;
mod uri;

#[cfg(test)]
mod testing;

pub use config::{ClientSettings, ResponsePreference};
pub use context::{CancelHandle, DataServiceContext, QueryResponse, QueryShape};
pub use error::{ClientError, ClientResult};
pub use events::{
    BuildingRequestArgs, ClientEvents, ReceivingResponseArgs, SendingRequestArgs,
    SendingRequestHook,
};
pub use model_cache::ModelCache;
pub use pipeline::{RequestContent, RequestPipeline, RequestSpec};
pub use save::{ChangeOperationResponse, SaveChangesOptions, SaveMode, SaveResult};
pub use serializer::PayloadSerializer;
pub use transport::{AsyncTransport, MockTransport, Transport, TransportFailure};
pub use uri::{
    entity_uri, key_segment, links_uri, navigation_uri, value_uri, BaseUriResolver, UriResolver,
};
