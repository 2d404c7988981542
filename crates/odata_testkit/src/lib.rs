//! # OData Testkit
//!
//! Test utilities for the OData client.
//!
//! This crate provides:
//! - Sample entity types and a client model
//! - A JSON payload serializer for the sample types
//! - An in-memory service that answers per-change requests
//! - Builders for canned responses, including batch responses
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use odata_testkit::prelude::*;
//!
//! #[test]
//! fn saves_a_customer() {
//!     let mut ctx = service_context();
//!     ctx.add_object("Customers", EntityRef::new(Customer::new(1, "Ann"))).unwrap();
//!     ctx.save_changes(SaveChangesOptions::NONE).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod responses;
pub mod serializer;
pub mod service;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::responses::*;
    pub use crate::serializer::*;
    pub use crate::service::*;
    pub use odata_client::{
        ClientError, ClientSettings, DataServiceContext, MockTransport, QueryResponse,
        QueryShape, SaveChangesOptions,
    };
    pub use odata_protocol::{names, PayloadKind, ProtocolVersion, ResponseMessage};
    pub use odata_tracking::{EntityRef, EntityState, EntryMetadata, MergeOption};
}

pub use fixtures::*;
pub use generators::*;
pub use responses::*;
pub use serializer::*;
pub use service::*;
