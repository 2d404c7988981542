//! Link descriptor.

use crate::entity::{EntityRef, ObjectKey};
use crate::types::{ChangeOrder, EntityState};

/// Equivalence key of a tracked relationship.
///
/// Endpoints compare by reference identity, the property by ordinal
/// string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkKey {
    /// Source entity.
    pub source: ObjectKey,
    /// Source navigation property.
    pub property: String,
    /// Target entity, absent for a cleared reference.
    pub target: Option<ObjectKey>,
}

impl LinkKey {
    /// Builds the key for a relationship.
    pub fn new(source: &EntityRef, property: impl Into<String>, target: Option<&EntityRef>) -> Self {
        Self {
            source: source.key(),
            property: property.into(),
            target: target.map(EntityRef::key),
        }
    }

    /// Returns true if the entity is one of the endpoints.
    #[must_use]
    pub fn touches(&self, entity: ObjectKey) -> bool {
        self.source == entity || self.target == Some(entity)
    }
}

/// Tracked state of one relationship.
#[derive(Debug, Clone)]
pub struct LinkDescriptor {
    pub(crate) source: EntityRef,
    pub(crate) source_property: String,
    pub(crate) target: Option<EntityRef>,
    pub(crate) is_collection: bool,
    pub(crate) state: EntityState,
    pub(crate) change_order: Option<ChangeOrder>,
    pub(crate) tracked_seq: u64,
    pub(crate) created_with_entity: bool,
}

impl LinkDescriptor {
    pub(crate) fn new(
        source: EntityRef,
        source_property: impl Into<String>,
        target: Option<EntityRef>,
        is_collection: bool,
        state: EntityState,
    ) -> Self {
        Self {
            source,
            source_property: source_property.into(),
            target,
            is_collection,
            state,
            change_order: None,
            tracked_seq: 0,
            created_with_entity: false,
        }
    }

    /// Equivalence key of this link.
    #[must_use]
    pub fn key(&self) -> LinkKey {
        LinkKey::new(&self.source, self.source_property.clone(), self.target.as_ref())
    }

    /// Source entity.
    #[must_use]
    pub fn source(&self) -> &EntityRef {
        &self.source
    }

    /// Source navigation property.
    #[must_use]
    pub fn source_property(&self) -> &str {
        &self.source_property
    }

    /// Target entity.
    #[must_use]
    pub fn target(&self) -> Option<&EntityRef> {
        self.target.as_ref()
    }

    /// Whether the source property is collection-valued.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.is_collection
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Change order.
    #[must_use]
    pub fn change_order(&self) -> Option<ChangeOrder> {
        self.change_order
    }

    /// True for the implicit link created together with a related entity.
    ///
    /// Such links are expressed by the entity's own insert request and are
    /// never sent on their own.
    #[must_use]
    pub fn is_created_with_entity(&self) -> bool {
        self.created_with_entity
    }

    /// Returns true if the next save has to send a request for this link.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.state.is_dirty() && !self.created_with_entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::ClientEntity;

    struct Node;

    impl ClientEntity for Node {
        fn type_name(&self) -> &str {
            "Node"
        }
    }

    #[test]
    fn key_equivalence_by_reference() {
        let a = EntityRef::new(Node);
        let b = EntityRef::new(Node);
        let k1 = LinkKey::new(&a, "Next", Some(&b));
        let k2 = LinkKey::new(&a.clone(), String::from("Next"), Some(&b.clone()));
        assert_eq!(k1, k2);
        assert_ne!(k1, LinkKey::new(&b, "Next", Some(&a)));
        assert_ne!(k1, LinkKey::new(&a, "next", Some(&b)));
    }

    #[test]
    fn touches_endpoints() {
        let a = EntityRef::new(Node);
        let b = EntityRef::new(Node);
        let c = EntityRef::new(Node);
        let key = LinkKey::new(&a, "Next", Some(&b));
        assert!(key.touches(a.key()));
        assert!(key.touches(b.key()));
        assert!(!key.touches(c.key()));
    }

    #[test]
    fn implicit_link_is_not_pending() {
        let a = EntityRef::new(Node);
        let b = EntityRef::new(Node);
        let mut link = LinkDescriptor::new(a, "Next", Some(b), true, EntityState::Added);
        assert!(link.has_pending_changes());
        link.created_with_entity = true;
        assert!(!link.has_pending_changes());
    }
}
