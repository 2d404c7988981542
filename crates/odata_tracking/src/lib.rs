//! # OData Tracking
//!
//! Client-side change tracking for the OData client.
//!
//! This crate provides:
//! - Entity handles with stable reference identity
//! - Client type metadata (navigation properties, streams, base types)
//! - Entity, link and named-stream descriptors
//! - The change tracker: identity map, change ordering and the
//!   descriptor state machine
//! - Relatability validation for relationships
//! - Merging of server-materialized entries under a merge option
//!
//! This is a pure state crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - At most one descriptor per tracked object reference
//! - Change order is strictly increasing across dirty-entry events
//! - Snapshots are always returned in ascending change order
//! - No link descriptor survives the removal of one of its endpoints
//!
//! ## Threading
//!
//! The tracker is single-writer by construction (`&mut self` for every
//! mutation). Callers must not mutate descriptors concurrently with a
//! save in progress.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod descriptor;
mod entity;
mod error;
mod materialize;
mod model;
mod operations;
mod relatability;
mod tracker;
mod types;

pub use descriptor::{
    DescriptorKey, EntityDescriptor, EntryMetadata, LinkDescriptor, LinkKey, NamedStreamInfo,
    ParentLink, SaveStream, StreamDescriptor, StreamState,
};
pub use entity::{ClientEntity, EntityRef, ObjectKey};
pub use error::{TrackingError, TrackingResult};
pub use materialize::MaterializedEntry;
pub use model::{ClientModel, ClientModelBuilder, EntityTypeInfo, NavigationProperty};
pub use operations::LinkOutcome;
pub use relatability::Relatability;
pub use tracker::EntityTracker;
pub use types::{ChangeOrder, EntityState, MergeOption};
