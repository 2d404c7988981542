//! Tracked descriptors.
//!
//! A descriptor is the tagged state kept for one tracked entity or one
//! tracked relationship. Descriptors are owned by the
//! [`EntityTracker`](crate::EntityTracker); callers only ever see shared
//! references or cloned snapshots.

mod entity;
mod link;
mod stream;

pub use entity::{EntityDescriptor, EntryMetadata, NamedStreamInfo, ParentLink};
pub use link::{LinkDescriptor, LinkKey};
pub use stream::{SaveStream, StreamDescriptor, StreamState};

use crate::entity::ObjectKey;

/// Key addressing either kind of descriptor inside a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorKey {
    /// An entity descriptor.
    Entity(ObjectKey),
    /// A link descriptor.
    Link(LinkKey),
}

impl DescriptorKey {
    /// Returns true if this addresses an entity descriptor.
    #[must_use]
    pub fn is_entity(&self) -> bool {
        matches!(self, DescriptorKey::Entity(_))
    }
}
