//! The descriptor state machine.
//!
//! Entity transitions:
//!
//! | From | Operation | To |
//! |---|---|---|
//! | Detached | `add_object`, `add_related_object` | Added |
//! | Detached | `attach_to` | Unchanged |
//! | Unchanged | `update_object` | Modified |
//! | Unchanged, Modified | `delete_object` | Deleted |
//! | Added | `delete_object` | Detached |
//! | any | `detach_entity` | Detached |
//!
//! Deleted is terminal except through detach.

use crate::descriptor::{
    DescriptorKey, EntityDescriptor, EntryMetadata, LinkDescriptor, LinkKey, ParentLink,
    SaveStream, StreamDescriptor, StreamState,
};
use crate::entity::EntityRef;
use crate::error::{TrackingError, TrackingResult};
use crate::relatability::{LinkOperation, Relatability};
use crate::tracker::EntityTracker;
use crate::types::EntityState;
use tracing::debug;

/// Result of deleting a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The link is tracked in the given state.
    Tracked(EntityState),
    /// The link was never seen by the server and is no longer tracked.
    Detached,
}

impl EntityTracker {
    /// Starts tracking a new entity that will be created in `entity_set`.
    pub fn add_object(&mut self, entity_set: &str, entity: EntityRef) -> TrackingResult<()> {
        if entity_set.is_empty() {
            return Err(TrackingError::EmptyEntitySet);
        }
        self.model().require_type(entity.type_name())?;

        let key = entity.key();
        let mut descriptor = EntityDescriptor::new(entity, EntityState::Added);
        descriptor.entity_set = Some(entity_set.to_string());
        self.add_entity_descriptor(descriptor)?;
        self.increment_change(&DescriptorKey::Entity(key))?;
        Ok(())
    }

    /// Starts tracking a new entity that will be created through a
    /// collection navigation property of `source`.
    ///
    /// The relationship itself is tracked as an implicit Added link that is
    /// expressed by the entity's insert request.
    pub fn add_related_object(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: EntityRef,
    ) -> TrackingResult<()> {
        let nav = self.navigation(source, property)?;
        if !nav.is_collection {
            return Err(TrackingError::NotCollectionProperty {
                property: property.to_string(),
            });
        }
        if self.get(source)?.state() == EntityState::Deleted {
            return Err(TrackingError::RelatedEndpointDeleted);
        }
        self.model().require_type(target.type_name())?;
        if !self.model().is_assignable(target.type_name(), &nav.target_type) {
            return Err(TrackingError::TypeNotAssignable {
                target_type: target.type_name().to_string(),
                property: property.to_string(),
                expected: nav.target_type,
            });
        }

        let mut descriptor = EntityDescriptor::new(target.clone(), EntityState::Added);
        descriptor.parent = Some(ParentLink {
            source: source.clone(),
            property: property.to_string(),
        });
        self.add_entity_descriptor(descriptor)?;

        let mut link = LinkDescriptor::new(
            source.clone(),
            property,
            Some(target.clone()),
            true,
            EntityState::Added,
        );
        link.created_with_entity = true;
        let link_key = link.key();
        self.track_link(link)?;

        self.increment_change(&DescriptorKey::Entity(target.key()))?;
        self.increment_change(&DescriptorKey::Link(link_key))?;
        Ok(())
    }

    /// Starts tracking an existing server entity as Unchanged.
    ///
    /// `metadata` must carry the server identity; edit link and ETag are
    /// recorded when present.
    pub fn attach_to(
        &mut self,
        entity_set: &str,
        entity: EntityRef,
        metadata: &EntryMetadata,
    ) -> TrackingResult<()> {
        if entity_set.is_empty() {
            return Err(TrackingError::EmptyEntitySet);
        }
        let identity = metadata
            .identity
            .clone()
            .filter(|i| !i.is_empty())
            .ok_or(TrackingError::MissingIdentity)?;
        self.model().require_type(entity.type_name())?;

        let mut descriptor = EntityDescriptor::new(entity, EntityState::Unchanged);
        descriptor.entity_set = Some(entity_set.to_string());
        descriptor.identity = Some(identity);
        descriptor.apply_metadata(metadata);
        self.add_entity_descriptor(descriptor)
    }

    /// Marks a tracked entity as modified.
    ///
    /// Added and Modified entities are left as they are.
    pub fn update_object(&mut self, entity: &EntityRef) -> TrackingResult<()> {
        match self.get(entity)?.state() {
            EntityState::Added | EntityState::Modified => Ok(()),
            EntityState::Unchanged => {
                self.mark_entity(entity.key(), EntityState::Modified);
                Ok(())
            }
            from => Err(TrackingError::transition(from, EntityState::Modified)),
        }
    }

    /// Marks a tracked entity for deletion.
    ///
    /// Deleting an Added entity detaches it: it never reached the server.
    /// That fails while an Added entity created through one of its
    /// navigation properties is still pending.
    pub fn delete_object(&mut self, entity: &EntityRef) -> TrackingResult<()> {
        match self.get(entity)?.state() {
            EntityState::Added => {
                self.ensure_no_added_children(entity.key())?;
                debug!(entity = ?entity, "deleting added entity detaches it");
                self.detach_entity_key(entity.key());
                Ok(())
            }
            EntityState::Unchanged | EntityState::Modified => {
                self.mark_entity(entity.key(), EntityState::Deleted);
                Ok(())
            }
            EntityState::Deleted => Ok(()),
            EntityState::Detached => Err(TrackingError::not_tracked(entity.type_name())),
        }
    }

    /// Forces an entity into a state.
    ///
    /// `Modified`, `Deleted` and `Detached` behave like `update_object`,
    /// `delete_object` and `detach_entity`. `Unchanged` accepts local
    /// modifications without a save. `Added` is rejected: it needs the
    /// context of an add operation.
    pub fn change_state(&mut self, entity: &EntityRef, state: EntityState) -> TrackingResult<()> {
        let current = self.get(entity)?.state();
        match state {
            EntityState::Added => Err(TrackingError::CannotForceAdded),
            EntityState::Detached => self.detach_entity(entity).map(|_| ()),
            EntityState::Modified if current == EntityState::Added => {
                Err(TrackingError::transition(current, state))
            }
            EntityState::Modified => self.update_object(entity),
            EntityState::Deleted => self.delete_object(entity),
            EntityState::Unchanged => match current {
                EntityState::Unchanged => Ok(()),
                EntityState::Modified => {
                    let descriptor = self.get_mut(entity)?;
                    descriptor.state = EntityState::Unchanged;
                    descriptor.change_order = None;
                    descriptor.save_stream = None;
                    for stream in descriptor.named_streams.values_mut() {
                        stream.state = StreamState::Unchanged;
                        stream.save_stream = None;
                    }
                    Ok(())
                }
                _ => Err(TrackingError::transition(current, state)),
            },
        }
    }

    /// Stops tracking an entity and every link touching it.
    ///
    /// Returns false if the entity was not tracked. Fails while an Added
    /// entity created through one of its navigation properties is pending.
    pub fn detach_entity(&mut self, entity: &EntityRef) -> TrackingResult<bool> {
        self.detach(&DescriptorKey::Entity(entity.key()))
    }

    /// Tracks a new relationship in a collection navigation property.
    pub fn add_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: &EntityRef,
    ) -> TrackingResult<()> {
        self.validate_relatable(source, property, Some(target), LinkOperation::Add)?;
        let link = LinkDescriptor::new(
            source.clone(),
            property,
            Some(target.clone()),
            true,
            EntityState::Added,
        );
        let key = link.key();
        self.track_link(link)?;
        self.increment_change(&DescriptorKey::Link(key))?;
        Ok(())
    }

    /// Tracks an existing server relationship as Unchanged.
    pub fn attach_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: &EntityRef,
    ) -> TrackingResult<()> {
        self.validate_relatable(source, property, Some(target), LinkOperation::Attach)?;
        let nav = self.navigation(source, property)?;
        let link = LinkDescriptor::new(
            source.clone(),
            property,
            Some(target.clone()),
            nav.is_collection,
            EntityState::Unchanged,
        );
        let key = link.key();
        self.track_link(link)?;
        self.increment_change(&DescriptorKey::Link(key))?;
        Ok(())
    }

    /// Sets (or clears, with `None`) a reference navigation property.
    ///
    /// Any tracked link from the same property to a different target is
    /// replaced.
    pub fn set_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: Option<&EntityRef>,
    ) -> TrackingResult<()> {
        self.validate_relatable(source, property, target, LinkOperation::Set)?;
        let key = LinkKey::new(source, property, target);

        for existing in self.link_keys_from(source.key(), property) {
            if existing != key {
                self.detach_link_key(&existing);
            }
        }

        if self.link(&key).is_none() {
            self.track_link(LinkDescriptor::new(
                source.clone(),
                property,
                target.cloned(),
                false,
                EntityState::Modified,
            ))?;
            self.increment_change(&DescriptorKey::Link(key))?;
        } else {
            self.mark_link(&key, EntityState::Modified);
        }
        Ok(())
    }

    /// Removes a relationship from a collection navigation property.
    ///
    /// A relationship the server never saw (the link is Added, or an
    /// endpoint is Added) is detached instead of deleted, and the outcome
    /// says so.
    pub fn delete_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: &EntityRef,
    ) -> TrackingResult<LinkOutcome> {
        let relatability =
            self.validate_relatable(source, property, Some(target), LinkOperation::Delete)?;
        let key = LinkKey::new(source, property, Some(target));
        let existing = self.link(&key).map(LinkDescriptor::state);

        if relatability == Relatability::DetachInstead || existing == Some(EntityState::Added) {
            self.detach_link_key(&key);
            return Ok(LinkOutcome::Detached);
        }

        match existing {
            Some(EntityState::Deleted) => {}
            Some(_) => self.mark_link(&key, EntityState::Deleted),
            None => {
                self.track_link(LinkDescriptor::new(
                    source.clone(),
                    property,
                    Some(target.clone()),
                    true,
                    EntityState::Deleted,
                ))?;
                self.increment_change(&DescriptorKey::Link(key))?;
            }
        }
        Ok(LinkOutcome::Tracked(EntityState::Deleted))
    }

    /// Stops tracking a relationship in any state. Endpoints are untouched.
    ///
    /// Returns false if the link was not tracked.
    pub fn detach_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: Option<&EntityRef>,
    ) -> bool {
        self.detach_link_key(&LinkKey::new(source, property, target))
    }

    /// Sets the default stream payload of a media link entry.
    pub fn set_save_stream(&mut self, entity: &EntityRef, stream: SaveStream) -> TrackingResult<()> {
        let state = self.get(entity)?.state();
        if state == EntityState::Deleted {
            return Err(TrackingError::InvalidStreamState { state });
        }
        if !self.model().has_stream(entity.type_name()) {
            return Err(TrackingError::NoDefaultStream {
                type_name: entity.type_name().to_string(),
            });
        }
        self.get_mut(entity)?.save_stream = Some(stream);
        self.increment_change(&DescriptorKey::Entity(entity.key()))?;
        Ok(())
    }

    /// Sets the payload of a named stream.
    ///
    /// The entity must exist on the server (not Added) and not be Deleted.
    /// The stream must be declared in the model or reported by the server.
    pub fn set_named_save_stream(
        &mut self,
        entity: &EntityRef,
        name: &str,
        stream: SaveStream,
    ) -> TrackingResult<()> {
        let descriptor = self.get(entity)?;
        let state = descriptor.state();
        if matches!(state, EntityState::Added | EntityState::Deleted) {
            return Err(TrackingError::InvalidStreamState { state });
        }
        let known = descriptor.named_stream(name).is_some()
            || self.model().has_named_stream(entity.type_name(), name);
        if name.is_empty() || !known {
            return Err(TrackingError::UnknownStream {
                type_name: entity.type_name().to_string(),
                stream: name.to_string(),
            });
        }

        let descriptor = self.get_mut(entity)?;
        let named = descriptor
            .named_streams
            .entry(name.to_string())
            .or_insert_with(|| StreamDescriptor::new(name));
        named.state = StreamState::Modified;
        named.save_stream = Some(stream);
        self.increment_change(&DescriptorKey::Entity(entity.key()))?;
        Ok(())
    }
}
