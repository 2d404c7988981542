//! Relatability validation.
//!
//! Before a link is created or transitioned, both endpoints must be
//! tracked, the navigation property must exist with the right shape, the
//! target must be type-compatible, and the endpoint states must allow the
//! requested link state.

use crate::entity::EntityRef;
use crate::error::{TrackingError, TrackingResult};
use crate::model::NavigationProperty;
use crate::tracker::EntityTracker;
use crate::types::EntityState;

/// Outcome of a successful relatability check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relatability {
    /// The link operation can proceed as requested.
    Proceed,
    /// The link touches an Added endpoint and is being deleted: the server
    /// never saw it, so the link must be detached instead of deleted.
    DetachInstead,
}

/// The link operation being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOperation {
    Add,
    Attach,
    Set,
    Delete,
}

impl LinkOperation {
    fn link_state(self) -> EntityState {
        match self {
            LinkOperation::Add => EntityState::Added,
            LinkOperation::Attach => EntityState::Unchanged,
            LinkOperation::Set => EntityState::Modified,
            LinkOperation::Delete => EntityState::Deleted,
        }
    }
}

/// Rejects empty names and names containing a path separator.
pub(crate) fn validate_property_name(property: &str) -> TrackingResult<()> {
    if property.is_empty() || property.contains('/') {
        return Err(TrackingError::InvalidPropertyName {
            property: property.to_string(),
        });
    }
    Ok(())
}

impl EntityTracker {
    /// Resolves a navigation property of a tracked source entity.
    pub(crate) fn navigation(
        &self,
        source: &EntityRef,
        property: &str,
    ) -> TrackingResult<NavigationProperty> {
        validate_property_name(property)?;
        self.model()
            .navigation_property(source.type_name(), property)
            .cloned()
            .ok_or_else(|| TrackingError::NoSuchNavigationProperty {
                type_name: source.type_name().to_string(),
                property: property.to_string(),
            })
    }

    /// Validates that a relationship can enter the state implied by `operation`.
    pub(crate) fn validate_relatable(
        &self,
        source: &EntityRef,
        property: &str,
        target: Option<&EntityRef>,
        operation: LinkOperation,
    ) -> TrackingResult<Relatability> {
        let nav = self.navigation(source, property)?;

        match operation {
            LinkOperation::Add | LinkOperation::Delete if !nav.is_collection => {
                return Err(TrackingError::NotCollectionProperty {
                    property: property.to_string(),
                });
            }
            LinkOperation::Set if nav.is_collection => {
                return Err(TrackingError::NotReferenceProperty {
                    property: property.to_string(),
                });
            }
            _ => {}
        }

        let source_state = self.get(source)?.state();
        let target_state = match target {
            Some(target) => {
                let state = self.get(target)?.state();
                if !self.model().is_assignable(target.type_name(), &nav.target_type) {
                    return Err(TrackingError::TypeNotAssignable {
                        target_type: target.type_name().to_string(),
                        property: property.to_string(),
                        expected: nav.target_type.clone(),
                    });
                }
                Some(state)
            }
            None if operation == LinkOperation::Set => None,
            None => {
                return Err(TrackingError::MissingLinkTarget {
                    property: property.to_string(),
                })
            }
        };

        let touches = |state: EntityState| source_state == state || target_state == Some(state);
        let link_state = operation.link_state();

        if matches!(link_state, EntityState::Added | EntityState::Unchanged)
            && touches(EntityState::Deleted)
        {
            return Err(TrackingError::RelatedEndpointDeleted);
        }

        if matches!(link_state, EntityState::Deleted | EntityState::Unchanged)
            && touches(EntityState::Added)
        {
            if link_state == EntityState::Deleted {
                return Ok(Relatability::DetachInstead);
            }
            return Err(TrackingError::RelatedEndpointAdded);
        }

        Ok(Relatability::Proceed)
    }
}
