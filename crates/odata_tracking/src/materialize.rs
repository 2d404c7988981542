//! Merging of server-materialized entries into the tracker.

use crate::descriptor::{EntityDescriptor, EntryMetadata, StreamState};
use crate::entity::EntityRef;
use crate::error::{TrackingError, TrackingResult};
use crate::tracker::EntityTracker;
use crate::types::{EntityState, MergeOption};
use tracing::trace;

/// An entry read from a response payload.
#[derive(Debug, Clone)]
pub struct MaterializedEntry {
    /// Freshly materialized object.
    pub entity: EntityRef,
    /// Entity set the entry was read from, if known.
    pub entity_set: Option<String>,
    /// Server metadata of the entry.
    pub metadata: EntryMetadata,
}

impl MaterializedEntry {
    /// Creates an entry.
    pub fn new(entity: EntityRef, metadata: EntryMetadata) -> Self {
        Self {
            entity,
            entity_set: None,
            metadata,
        }
    }

    /// Sets the entity set.
    pub fn in_set(mut self, entity_set: impl Into<String>) -> Self {
        self.entity_set = Some(entity_set.into());
        self
    }
}

impl EntityTracker {
    /// Reconciles a materialized entry with tracked state.
    ///
    /// Returns the handle the caller should see: the already tracked
    /// object when the identity is known, the materialized one otherwise.
    ///
    /// | Option | Identity tracked | Effect |
    /// |---|---|---|
    /// | `AppendOnly` | yes | nothing |
    /// | `OverwriteChanges` | yes | metadata refreshed, state forced to Unchanged |
    /// | `PreserveChanges` | yes | metadata refreshed only if Unchanged |
    /// | any tracking option | no | entry attached as Unchanged |
    /// | `NoTracking` | - | tracker untouched |
    pub fn merge_materialized(
        &mut self,
        entry: MaterializedEntry,
        merge_option: MergeOption,
    ) -> TrackingResult<EntityRef> {
        if merge_option == MergeOption::NoTracking {
            return Ok(entry.entity);
        }
        let identity = entry
            .metadata
            .identity
            .clone()
            .filter(|i| !i.is_empty())
            .ok_or(TrackingError::MissingIdentity)?;

        let tracked = self
            .try_get_by_identity(&identity)
            .map(|d| d.entity().clone())
            .or_else(|| self.try_get(&entry.entity).map(|d| d.entity().clone()));

        let Some(tracked) = tracked else {
            self.model().require_type(entry.entity.type_name())?;
            let mut descriptor = EntityDescriptor::new(entry.entity.clone(), EntityState::Unchanged);
            descriptor.entity_set = entry.entity_set;
            descriptor.identity = Some(identity);
            descriptor.apply_metadata(&entry.metadata);
            self.add_entity_descriptor(descriptor)?;
            return Ok(entry.entity);
        };

        let state = self.get(&tracked)?.state();
        match merge_option {
            MergeOption::AppendOnly => {}
            MergeOption::OverwriteChanges => {
                self.apply_entry_metadata(&tracked, &entry.metadata)?;
                if state != EntityState::Added {
                    let descriptor = self.get_mut(&tracked)?;
                    descriptor.state = EntityState::Unchanged;
                    descriptor.change_order = None;
                    descriptor.save_stream = None;
                    for stream in descriptor.named_streams.values_mut() {
                        stream.state = StreamState::Unchanged;
                        stream.save_stream = None;
                    }
                }
            }
            MergeOption::PreserveChanges => {
                if state == EntityState::Unchanged {
                    self.apply_entry_metadata(&tracked, &entry.metadata)?;
                }
            }
            MergeOption::NoTracking => {}
        }
        trace!(identity = %identity, ?merge_option, "merged materialized entry");
        Ok(tracked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ClientEntity;
    use crate::model::{ClientModel, EntityTypeInfo};
    use std::sync::Arc;

    struct Customer;

    impl ClientEntity for Customer {
        fn type_name(&self) -> &str {
            "Customer"
        }
    }

    fn tracker() -> EntityTracker {
        let model = ClientModel::builder()
            .entity_type(EntityTypeInfo::new("Customer").with_key("ID"))
            .build()
            .unwrap();
        EntityTracker::new(Arc::new(model))
    }

    fn entry(identity: &str, etag: &str) -> MaterializedEntry {
        MaterializedEntry::new(
            EntityRef::new(Customer),
            EntryMetadata::with_identity(identity).etag(etag),
        )
        .in_set("Customers")
    }

    fn modified(t: &mut EntityTracker) -> EntityRef {
        let c = EntityRef::new(Customer);
        t.attach_to("Customers", c.clone(), &EntryMetadata::with_identity("Customers(1)").etag("1"))
            .unwrap();
        t.update_object(&c).unwrap();
        c
    }

    #[test]
    fn new_identity_is_attached() {
        let mut t = tracker();
        let e = entry("Customers(1)", "1");
        let materialized = e.entity.clone();
        let handle = t.merge_materialized(e, MergeOption::AppendOnly).unwrap();
        assert_eq!(handle, materialized);
        let d = t.get(&handle).unwrap();
        assert_eq!(d.state(), EntityState::Unchanged);
        assert_eq!(d.entity_set(), Some("Customers"));
        assert_eq!(d.etag(), Some("1"));
    }

    #[test]
    fn append_only_keeps_tracked_state() {
        let mut t = tracker();
        let c = modified(&mut t);
        let handle = t.merge_materialized(entry("Customers(1)", "2"), MergeOption::AppendOnly).unwrap();
        assert_eq!(handle, c);
        let d = t.get(&c).unwrap();
        assert_eq!(d.state(), EntityState::Modified);
        assert_eq!(d.etag(), Some("1"));
        assert_eq!(t.entity_count(), 1);
    }

    #[test]
    fn overwrite_discards_local_changes() {
        let mut t = tracker();
        let c = modified(&mut t);
        t.merge_materialized(entry("Customers(1)", "2"), MergeOption::OverwriteChanges)
            .unwrap();
        let d = t.get(&c).unwrap();
        assert_eq!(d.state(), EntityState::Unchanged);
        assert_eq!(d.change_order(), None);
        assert_eq!(d.etag(), Some("2"));
    }

    #[test]
    fn preserve_keeps_modified() {
        let mut t = tracker();
        let c = modified(&mut t);
        t.merge_materialized(entry("Customers(1)", "2"), MergeOption::PreserveChanges)
            .unwrap();
        assert_eq!(t.get(&c).unwrap().etag(), Some("1"));

        t.change_state(&c, EntityState::Unchanged).unwrap();
        t.merge_materialized(entry("Customers(1)", "3"), MergeOption::PreserveChanges)
            .unwrap();
        assert_eq!(t.get(&c).unwrap().etag(), Some("3"));
    }

    #[test]
    fn no_tracking_leaves_tracker_alone() {
        let mut t = tracker();
        let e = entry("Customers(9)", "1");
        let materialized = e.entity.clone();
        let handle = t.merge_materialized(e, MergeOption::NoTracking).unwrap();
        assert_eq!(handle, materialized);
        assert_eq!(t.entity_count(), 0);
    }

    #[test]
    fn missing_identity_rejected() {
        let mut t = tracker();
        let e = MaterializedEntry::new(EntityRef::new(Customer), EntryMetadata::default());
        assert_eq!(
            t.merge_materialized(e, MergeOption::AppendOnly),
            Err(TrackingError::MissingIdentity)
        );
    }
}
