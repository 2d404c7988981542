//! Entity handle.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A host object that can be tracked by the client.
///
/// Implementors report their runtime entity type name, which must match a
/// type registered in the [`ClientModel`](crate::ClientModel). Objects that
/// need to be mutated after tracking should use interior mutability; the
/// tracker never copies them.
pub trait ClientEntity: Any + Send + Sync {
    /// Returns the entity type name used for metadata lookup.
    fn type_name(&self) -> &str;
}

/// Hashable identity of a tracked object reference.
///
/// Derived from the address of the shared allocation. The tracker keeps a
/// clone of every tracked [`EntityRef`], so the address cannot be reused
/// while the key is in the identity map.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey(usize);

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:#x})", self.0)
    }
}

/// Shared handle to a host entity object.
///
/// Cloning the handle does not clone the object: all clones compare equal
/// and map to the same descriptor. Two handles created from equal values
/// are still two distinct entities.
#[derive(Clone)]
pub struct EntityRef {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: Arc<str>,
}

impl EntityRef {
    /// Wraps a host object in a new handle with a fresh identity.
    pub fn new<T: ClientEntity>(entity: T) -> Self {
        let type_name: Arc<str> = Arc::from(entity.type_name());
        Self {
            inner: Arc::new(entity),
            type_name,
        }
    }

    /// Returns the identity key of this handle.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Returns true if both handles refer to the same object.
    #[must_use]
    pub fn same_as(&self, other: &EntityRef) -> bool {
        self.key() == other.key()
    }

    /// Returns the entity type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Returns typed access to the host object.
    #[must_use]
    pub fn downcast_ref<T: ClientEntity>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl Eq for EntityRef {}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({} @ {:?})", self.type_name, self.key())
    }
}
