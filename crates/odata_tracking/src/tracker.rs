//! The change tracker.

use crate::descriptor::{
    DescriptorKey, EntityDescriptor, EntryMetadata, LinkDescriptor, LinkKey, StreamState,
};
use crate::entity::{EntityRef, ObjectKey};
use crate::error::{TrackingError, TrackingResult};
use crate::model::ClientModel;
use crate::types::{ChangeOrder, EntityState};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Identity map and invariant-enforcing authority over descriptors.
///
/// The tracker provides:
/// - At most one descriptor per object reference
/// - A single change-order counter shared by entities and links
/// - Snapshots ordered by change order (the replay order of a save)
/// - Cascading removal of links when an endpoint is detached
///
/// ## Ordering
///
/// [`entities`](Self::entities), [`links`](Self::links) and
/// [`pending`](Self::pending) sort by `(change order, tracking sequence)`.
/// Descriptors without a change order sort first. The result is stable
/// across calls until the next mutation.
pub struct EntityTracker {
    model: Arc<ClientModel>,
    entities: HashMap<ObjectKey, EntityDescriptor>,
    links: HashMap<LinkKey, LinkDescriptor>,
    identities: HashMap<String, ObjectKey>,
    next_change: ChangeOrder,
    next_tracked: u64,
}

impl EntityTracker {
    /// Creates an empty tracker over a client model.
    pub fn new(model: Arc<ClientModel>) -> Self {
        Self {
            model,
            entities: HashMap::new(),
            links: HashMap::new(),
            identities: HashMap::new(),
            next_change: ChangeOrder::new(1),
            next_tracked: 1,
        }
    }

    /// Returns the client model.
    #[must_use]
    pub fn model(&self) -> &ClientModel {
        &self.model
    }

    /// Looks up a tracked entity, failing if it is not tracked.
    pub fn get(&self, entity: &EntityRef) -> TrackingResult<&EntityDescriptor> {
        self.entities
            .get(&entity.key())
            .ok_or_else(|| TrackingError::not_tracked(entity.type_name()))
    }

    /// Looks up a tracked entity.
    #[must_use]
    pub fn try_get(&self, entity: &EntityRef) -> Option<&EntityDescriptor> {
        self.entities.get(&entity.key())
    }

    /// Looks up a tracked entity by key.
    #[must_use]
    pub fn try_get_by_key(&self, key: ObjectKey) -> Option<&EntityDescriptor> {
        self.entities.get(&key)
    }

    /// Looks up the entity owning a server identity.
    #[must_use]
    pub fn try_get_by_identity(&self, identity: &str) -> Option<&EntityDescriptor> {
        self.identities
            .get(identity)
            .and_then(|key| self.entities.get(key))
    }

    pub(crate) fn get_mut(&mut self, entity: &EntityRef) -> TrackingResult<&mut EntityDescriptor> {
        self.entities
            .get_mut(&entity.key())
            .ok_or_else(|| TrackingError::not_tracked(entity.type_name()))
    }

    /// Looks up a tracked link.
    #[must_use]
    pub fn link(&self, key: &LinkKey) -> Option<&LinkDescriptor> {
        self.links.get(key)
    }

    /// Looks up a tracked link by its endpoints.
    #[must_use]
    pub fn try_get_link(
        &self,
        source: &EntityRef,
        property: &str,
        target: Option<&EntityRef>,
    ) -> Option<&LinkDescriptor> {
        self.links.get(&LinkKey::new(source, property, target))
    }

    /// Keys of all links leaving `source` through `property`.
    pub(crate) fn link_keys_from(&self, source: ObjectKey, property: &str) -> Vec<LinkKey> {
        self.links
            .keys()
            .filter(|k| k.source == source && k.property == property)
            .cloned()
            .collect()
    }

    /// Starts tracking an entity descriptor.
    ///
    /// Fails if the object reference is already tracked or if the
    /// descriptor's identity is owned by another object.
    pub(crate) fn add_entity_descriptor(&mut self, mut descriptor: EntityDescriptor) -> TrackingResult<()> {
        let key = descriptor.entity.key();
        if self.entities.contains_key(&key) {
            return Err(TrackingError::AlreadyTracked {
                type_name: descriptor.entity.type_name().to_string(),
            });
        }
        if let Some(identity) = &descriptor.identity {
            if self.identities.contains_key(identity) {
                return Err(TrackingError::IdentityConflict {
                    identity: identity.clone(),
                });
            }
            self.identities.insert(identity.clone(), key);
        }

        descriptor.tracked_seq = self.next_tracked;
        self.next_tracked += 1;
        trace!(entity = ?descriptor.entity, state = %descriptor.state, "tracking entity");
        self.entities.insert(key, descriptor);
        Ok(())
    }

    /// Starts tracking a link descriptor.
    pub(crate) fn track_link(&mut self, mut descriptor: LinkDescriptor) -> TrackingResult<()> {
        let key = descriptor.key();
        if self.links.contains_key(&key) {
            return Err(TrackingError::LinkAlreadyTracked {
                property: descriptor.source_property.clone(),
            });
        }
        descriptor.tracked_seq = self.next_tracked;
        self.next_tracked += 1;
        trace!(property = %descriptor.source_property, state = %descriptor.state, "tracking link");
        self.links.insert(key, descriptor);
        Ok(())
    }

    fn take_change_order(&mut self) -> ChangeOrder {
        let order = self.next_change;
        self.next_change = order.next();
        order
    }

    /// Assigns the next change order to a descriptor that has none.
    ///
    /// Idempotent: a descriptor that already carries a change order keeps
    /// it. Returns the descriptor's change order.
    pub fn increment_change(&mut self, key: &DescriptorKey) -> TrackingResult<ChangeOrder> {
        let current = match key {
            DescriptorKey::Entity(k) => self.entities.get(k).map(|d| d.change_order),
            DescriptorKey::Link(k) => self.links.get(k).map(|d| d.change_order),
        };
        match current {
            None => Err(TrackingError::not_tracked("descriptor")),
            Some(Some(order)) => Ok(order),
            Some(None) => {
                let order = self.take_change_order();
                match key {
                    DescriptorKey::Entity(k) => {
                        if let Some(d) = self.entities.get_mut(k) {
                            d.change_order = Some(order);
                        }
                    }
                    DescriptorKey::Link(k) => {
                        if let Some(d) = self.links.get_mut(k) {
                            d.change_order = Some(order);
                        }
                    }
                }
                Ok(order)
            }
        }
    }

    /// Moves an entity into a dirty state.
    ///
    /// Entering a dirty state assigns a fresh change order; re-entering the
    /// state the descriptor is already in keeps the existing one. Moving
    /// between two different dirty states, such as Modified to Deleted,
    /// counts as a new change and takes a fresh order.
    pub(crate) fn mark_entity(&mut self, key: ObjectKey, state: EntityState) {
        let needs_order = match self.entities.get(&key) {
            Some(d) => d.state != state || d.change_order.is_none(),
            None => return,
        };
        let order = needs_order.then(|| self.take_change_order());
        if let Some(d) = self.entities.get_mut(&key) {
            debug!(entity = ?d.entity, from = %d.state, to = %state, "entity state change");
            d.state = state;
            if let Some(order) = order {
                d.change_order = Some(order);
            }
        }
    }

    /// Moves a link into a dirty state, with the same ordering rule as
    /// [`mark_entity`](Self::mark_entity).
    pub(crate) fn mark_link(&mut self, key: &LinkKey, state: EntityState) {
        let needs_order = match self.links.get(key) {
            Some(d) => d.state != state || d.change_order.is_none(),
            None => return,
        };
        let order = needs_order.then(|| self.take_change_order());
        if let Some(d) = self.links.get_mut(key) {
            debug!(property = %d.source_property, from = %d.state, to = %state, "link state change");
            d.state = state;
            if let Some(order) = order {
                d.change_order = Some(order);
            }
        }
    }

    /// Stops tracking a descriptor.
    ///
    /// Detaching an entity also detaches every link that has it as an
    /// endpoint. Returns false if nothing was tracked under the key.
    ///
    /// # Errors
    ///
    /// Fails for an entity that is the parent of an Added entity created
    /// through one of its navigation properties.
    pub fn detach(&mut self, key: &DescriptorKey) -> TrackingResult<bool> {
        match key {
            DescriptorKey::Entity(k) => {
                self.ensure_no_added_children(*k)?;
                Ok(self.detach_entity_key(*k))
            }
            DescriptorKey::Link(k) => Ok(self.detach_link_key(k)),
        }
    }

    pub(crate) fn detach_link_key(&mut self, key: &LinkKey) -> bool {
        self.links.remove(key).is_some()
    }

    /// Fails if an Added entity still inserts through a navigation
    /// property of the entity under `key`.
    pub(crate) fn ensure_no_added_children(&self, key: ObjectKey) -> TrackingResult<()> {
        let parent_of_added = self.entities.values().any(|d| {
            d.state == EntityState::Added
                && d.parent.as_ref().is_some_and(|p| p.source.key() == key)
        });
        match self.entities.get(&key) {
            Some(parent) if parent_of_added => Err(TrackingError::ChildResourceExists {
                type_name: parent.entity.type_name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn detach_entity_key(&mut self, key: ObjectKey) -> bool {
        let Some(descriptor) = self.entities.remove(&key) else {
            return false;
        };
        if let Some(identity) = &descriptor.identity {
            self.identities.remove(identity);
        }
        // An accepted delete can outlive its dependents' inserts.
        for dependent in self.entities.values_mut() {
            if dependent.parent.as_ref().is_some_and(|p| p.source.key() == key) {
                dependent.parent = None;
            }
        }
        let before = self.links.len();
        self.links.retain(|k, _| !k.touches(key));
        debug!(
            entity = ?descriptor.entity,
            links = before - self.links.len(),
            "detached entity"
        );
        true
    }

    fn sorted<'a, T>(
        items: impl Iterator<Item = &'a T>,
        sort_key: impl Fn(&T) -> (Option<ChangeOrder>, u64),
    ) -> Vec<&'a T> {
        let mut items: Vec<&T> = items.collect();
        items.sort_by_key(|d| sort_key(d));
        items
    }

    /// All tracked entities in ascending change order.
    #[must_use]
    pub fn entities(&self) -> Vec<&EntityDescriptor> {
        Self::sorted(self.entities.values(), |d| (d.change_order, d.tracked_seq))
    }

    /// All tracked links in ascending change order.
    #[must_use]
    pub fn links(&self) -> Vec<&LinkDescriptor> {
        Self::sorted(self.links.values(), |d| (d.change_order, d.tracked_seq))
    }

    /// Descriptors with pending changes, entities and links interleaved in
    /// ascending change order. This is the replay order of a save.
    #[must_use]
    pub fn pending(&self) -> Vec<DescriptorKey> {
        let mut pending: Vec<(Option<ChangeOrder>, u64, DescriptorKey)> = self
            .entities
            .iter()
            .filter(|(_, d)| d.has_pending_changes())
            .map(|(k, d)| (d.change_order, d.tracked_seq, DescriptorKey::Entity(*k)))
            .chain(
                self.links
                    .iter()
                    .filter(|(_, d)| d.has_pending_changes())
                    .map(|(k, d)| (d.change_order, d.tracked_seq, DescriptorKey::Link(k.clone()))),
            )
            .collect();
        pending.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        pending.into_iter().map(|(_, _, key)| key).collect()
    }

    /// Entities with pending changes in ascending change order.
    #[must_use]
    pub fn pending_entities(&self) -> Vec<&EntityDescriptor> {
        Self::sorted(
            self.entities.values().filter(|d| d.has_pending_changes()),
            |d| (d.change_order, d.tracked_seq),
        )
    }

    /// Links with pending changes in ascending change order.
    #[must_use]
    pub fn pending_links(&self) -> Vec<&LinkDescriptor> {
        Self::sorted(
            self.links.values().filter(|d| d.has_pending_changes()),
            |d| (d.change_order, d.tracked_seq),
        )
    }

    /// Returns true if a save would send anything.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.entities.values().any(EntityDescriptor::has_pending_changes)
            || self.links.values().any(LinkDescriptor::has_pending_changes)
    }

    /// Number of tracked entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of tracked links.
    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Records a server identity for a tracked entity.
    ///
    /// Fails if the identity is already owned by a different object.
    pub fn attach_identity(&mut self, entity: &EntityRef, identity: &str) -> TrackingResult<()> {
        let key = entity.key();
        if let Some(owner) = self.identities.get(identity) {
            if *owner != key {
                return Err(TrackingError::IdentityConflict {
                    identity: identity.to_string(),
                });
            }
        }
        let descriptor = self.get_mut(entity)?;
        let previous = descriptor.identity.replace(identity.to_string());
        if let Some(previous) = previous {
            if previous != identity {
                self.identities.remove(&previous);
            }
        }
        self.identities.insert(identity.to_string(), key);
        Ok(())
    }

    /// Applies server metadata (identity, links, tokens) to a tracked entity.
    pub fn apply_entry_metadata(
        &mut self,
        entity: &EntityRef,
        metadata: &EntryMetadata,
    ) -> TrackingResult<()> {
        if let Some(identity) = &metadata.identity {
            self.attach_identity(entity, identity)?;
        }
        self.get_mut(entity)?.apply_metadata(metadata);
        Ok(())
    }

    /// Discharges the pending change of an entity after the server
    /// accepted it.
    ///
    /// Deleted entities are detached. Everything else becomes Unchanged
    /// with no change order and no pending streams. For an entity created
    /// through a navigation property, the implicit link becomes Unchanged.
    pub fn accept_entity_change(&mut self, entity: &EntityRef) -> TrackingResult<()> {
        let key = entity.key();
        let descriptor = self.get_mut(entity)?;
        if descriptor.state == EntityState::Deleted {
            self.detach_entity_key(key);
            return Ok(());
        }

        descriptor.state = EntityState::Unchanged;
        descriptor.change_order = None;
        descriptor.save_stream = None;
        for stream in descriptor.named_streams.values_mut() {
            stream.state = StreamState::Unchanged;
            stream.save_stream = None;
        }
        let parent = descriptor.parent.take();

        if let Some(parent) = parent {
            let link_key = LinkKey::new(&parent.source, parent.property, Some(entity));
            if let Some(link) = self.links.get_mut(&link_key) {
                link.state = EntityState::Unchanged;
                link.created_with_entity = false;
            }
        }
        trace!(entity = ?entity, "entity change accepted");
        Ok(())
    }

    /// Records the server response to a media resource creation.
    ///
    /// The entity now exists on the server: its metadata is applied, the
    /// pending stream is cleared and it becomes Modified so that its
    /// properties are sent next. The change order is kept.
    pub fn accept_media_resource(
        &mut self,
        entity: &EntityRef,
        metadata: &EntryMetadata,
    ) -> TrackingResult<()> {
        self.apply_entry_metadata(entity, metadata)?;
        let descriptor = self.get_mut(entity)?;
        if descriptor.state != EntityState::Added {
            return Err(TrackingError::transition(descriptor.state, EntityState::Modified));
        }
        descriptor.state = EntityState::Modified;
        descriptor.save_stream = None;
        trace!(entity = ?entity, "media resource created");
        Ok(())
    }

    /// Clears the pending default stream of an entity.
    pub fn clear_save_stream(&mut self, entity: &EntityRef) -> TrackingResult<()> {
        self.get_mut(entity)?.save_stream = None;
        Ok(())
    }

    /// Discharges a named stream upload.
    pub fn accept_named_stream(
        &mut self,
        entity: &EntityRef,
        name: &str,
        etag: Option<String>,
    ) -> TrackingResult<()> {
        let descriptor = self.get_mut(entity)?;
        if let Some(stream) = descriptor.named_streams.get_mut(name) {
            stream.state = StreamState::Unchanged;
            stream.save_stream = None;
            if etag.is_some() {
                stream.etag = etag;
            }
        }
        Ok(())
    }

    /// Discharges the pending change of a link after the server accepted it.
    ///
    /// Deleted links and cleared references are detached; everything else
    /// becomes Unchanged.
    pub fn accept_link_change(&mut self, key: &LinkKey) -> TrackingResult<()> {
        let Some(link) = self.links.get_mut(key) else {
            return Err(TrackingError::not_tracked("link"));
        };
        if link.state == EntityState::Deleted || link.target.is_none() {
            self.links.remove(key);
        } else {
            link.state = EntityState::Unchanged;
        }
        Ok(())
    }

    /// Discharges every pending change without contacting the server.
    pub fn clear_changes(&mut self) {
        let deleted: Vec<ObjectKey> = self
            .entities
            .iter()
            .filter(|(_, d)| d.state == EntityState::Deleted)
            .map(|(k, _)| *k)
            .collect();
        for key in deleted {
            self.detach_entity_key(key);
        }
        for descriptor in self.entities.values_mut() {
            descriptor.state = EntityState::Unchanged;
            descriptor.change_order = None;
            descriptor.save_stream = None;
            descriptor.parent = None;
            for stream in descriptor.named_streams.values_mut() {
                stream.state = StreamState::Unchanged;
                stream.save_stream = None;
            }
        }
        self.links
            .retain(|_, l| l.state != EntityState::Deleted && l.target.is_some());
        for link in self.links.values_mut() {
            link.state = EntityState::Unchanged;
            link.created_with_entity = false;
        }
        debug!("cleared pending changes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ClientEntity;
    use crate::model::EntityTypeInfo;
    use proptest::prelude::*;

    struct Item;

    impl ClientEntity for Item {
        fn type_name(&self) -> &str {
            "Item"
        }
    }

    fn tracker() -> EntityTracker {
        let model = ClientModel::builder()
            .entity_type(EntityTypeInfo::new("Item").with_key("ID").with_collection("Children", "Item"))
            .build()
            .unwrap();
        EntityTracker::new(Arc::new(model))
    }

    fn track(tracker: &mut EntityTracker, state: EntityState) -> EntityRef {
        let entity = EntityRef::new(Item);
        tracker
            .add_entity_descriptor(EntityDescriptor::new(entity.clone(), state))
            .unwrap();
        entity
    }

    #[test]
    fn get_and_try_get() {
        let mut t = tracker();
        let tracked = track(&mut t, EntityState::Unchanged);
        let other = EntityRef::new(Item);

        assert!(t.get(&tracked).is_ok());
        assert!(t.try_get(&other).is_none());
        assert!(matches!(t.get(&other), Err(TrackingError::NotTracked { .. })));
    }

    #[test]
    fn duplicate_tracking_rejected() {
        let mut t = tracker();
        let entity = track(&mut t, EntityState::Unchanged);
        let result = t.add_entity_descriptor(EntityDescriptor::new(entity, EntityState::Added));
        assert!(matches!(result, Err(TrackingError::AlreadyTracked { .. })));
        assert_eq!(t.entity_count(), 1);
    }

    #[test]
    fn increment_change_is_idempotent() {
        let mut t = tracker();
        let entity = track(&mut t, EntityState::Added);
        let key = DescriptorKey::Entity(entity.key());

        let first = t.increment_change(&key).unwrap();
        let second = t.increment_change(&key).unwrap();
        assert_eq!(first, second);

        let other = track(&mut t, EntityState::Added);
        let third = t.increment_change(&DescriptorKey::Entity(other.key())).unwrap();
        assert!(third > first);
    }

    #[test]
    fn entities_sorted_by_change_order() {
        let mut t = tracker();
        let a = track(&mut t, EntityState::Unchanged);
        let b = track(&mut t, EntityState::Unchanged);
        let c = track(&mut t, EntityState::Unchanged);

        t.mark_entity(c.key(), EntityState::Modified);
        t.mark_entity(a.key(), EntityState::Modified);

        let order: Vec<ObjectKey> = t.entities().iter().map(|d| d.entity().key()).collect();
        assert_eq!(order, vec![b.key(), c.key(), a.key()]);
        let again: Vec<ObjectKey> = t.entities().iter().map(|d| d.entity().key()).collect();
        assert_eq!(order, again);

        let pending = t.pending();
        assert_eq!(
            pending,
            vec![DescriptorKey::Entity(c.key()), DescriptorKey::Entity(a.key())]
        );
    }

    #[test]
    fn remarking_same_state_keeps_order() {
        let mut t = tracker();
        let a = track(&mut t, EntityState::Unchanged);
        t.mark_entity(a.key(), EntityState::Modified);
        let first = t.get(&a).unwrap().change_order();
        t.mark_entity(a.key(), EntityState::Modified);
        assert_eq!(t.get(&a).unwrap().change_order(), first);
        t.mark_entity(a.key(), EntityState::Deleted);
        assert!(t.get(&a).unwrap().change_order() > first);
    }

    #[test]
    fn detach_cascades_links() {
        let mut t = tracker();
        let a = track(&mut t, EntityState::Unchanged);
        let b = track(&mut t, EntityState::Unchanged);
        let c = track(&mut t, EntityState::Unchanged);
        t.track_link(LinkDescriptor::new(a.clone(), "Children", Some(b.clone()), true, EntityState::Added))
            .unwrap();
        t.track_link(LinkDescriptor::new(c.clone(), "Children", Some(a.clone()), true, EntityState::Added))
            .unwrap();
        t.track_link(LinkDescriptor::new(c.clone(), "Children", Some(b.clone()), true, EntityState::Added))
            .unwrap();

        assert!(t.detach(&DescriptorKey::Entity(a.key())).unwrap());
        assert_eq!(t.link_count(), 1);
        assert!(t.links().iter().all(|l| !l.key().touches(a.key())));
        assert!(!t.detach(&DescriptorKey::Entity(a.key())).unwrap());
    }

    #[test]
    fn identity_index() {
        let mut t = tracker();
        let a = track(&mut t, EntityState::Unchanged);
        let b = track(&mut t, EntityState::Unchanged);

        t.attach_identity(&a, "Items(1)").unwrap();
        assert_eq!(t.try_get_by_identity("Items(1)").unwrap().entity(), &a);

        let conflict = t.attach_identity(&b, "Items(1)");
        assert!(matches!(conflict, Err(TrackingError::IdentityConflict { .. })));

        t.detach(&DescriptorKey::Entity(a.key())).unwrap();
        assert!(t.try_get_by_identity("Items(1)").is_none());
        t.attach_identity(&b, "Items(1)").unwrap();
    }

    #[test]
    fn accept_changes() {
        let mut t = tracker();
        let added = track(&mut t, EntityState::Unchanged);
        let deleted = track(&mut t, EntityState::Unchanged);
        t.mark_entity(added.key(), EntityState::Added);
        t.mark_entity(deleted.key(), EntityState::Deleted);

        t.apply_entry_metadata(&added, &EntryMetadata::with_identity("Items(7)").etag("W/\"1\""))
            .unwrap();
        t.accept_entity_change(&added).unwrap();
        t.accept_entity_change(&deleted).unwrap();

        let d = t.get(&added).unwrap();
        assert_eq!(d.state(), EntityState::Unchanged);
        assert_eq!(d.change_order(), None);
        assert_eq!(d.identity(), Some("Items(7)"));
        assert_eq!(d.etag(), Some("W/\"1\""));
        assert!(t.try_get(&deleted).is_none());
        assert!(!t.has_pending_changes());
    }

    #[test]
    fn clear_changes_discharges_everything() {
        let mut t = tracker();
        let a = track(&mut t, EntityState::Unchanged);
        let b = track(&mut t, EntityState::Unchanged);
        t.mark_entity(a.key(), EntityState::Modified);
        t.mark_entity(b.key(), EntityState::Deleted);
        t.track_link(LinkDescriptor::new(a.clone(), "Children", Some(a.clone()), true, EntityState::Added))
            .unwrap();

        t.clear_changes();

        assert!(!t.has_pending_changes());
        assert_eq!(t.entity_count(), 1);
        assert_eq!(t.links()[0].state(), EntityState::Unchanged);
    }

    fn dirty_state() -> impl Strategy<Value = EntityState> {
        prop_oneof![
            Just(EntityState::Added),
            Just(EntityState::Modified),
            Just(EntityState::Deleted),
        ]
    }

    proptest! {
        #[test]
        fn change_orders_only_grow(marks in prop::collection::vec((0usize..4, dirty_state()), 1..40)) {
            let mut t = tracker();
            let items: Vec<EntityRef> = (0..4).map(|_| track(&mut t, EntityState::Unchanged)).collect();
            let mut highest = None;
            for (i, state) in marks {
                let (was, before) = {
                    let d = t.get(&items[i]).unwrap();
                    (d.state(), d.change_order())
                };
                t.mark_entity(items[i].key(), state);
                let after = t.get(&items[i]).unwrap().change_order();
                prop_assert!(after.is_some());
                if was == state && before.is_some() {
                    prop_assert_eq!(after, before);
                } else {
                    prop_assert!(after > highest);
                    highest = after;
                }
            }

            let orders: Vec<_> = t.pending_entities().iter().map(|d| d.change_order()).collect();
            prop_assert!(orders.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
