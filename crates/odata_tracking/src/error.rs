//! Error types for change tracking.

use crate::types::EntityState;
use thiserror::Error;

/// Result type for tracking operations.
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Errors raised by the tracker.
///
/// Every variant is a caller error detected synchronously, before any
/// request is built. None of them is retryable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackingError {
    /// The entity is not tracked by this tracker.
    #[error("entity of type {type_name} is not tracked")]
    NotTracked {
        /// Runtime type of the entity.
        type_name: String,
    },

    /// The entity reference is already tracked.
    #[error("entity of type {type_name} is already tracked")]
    AlreadyTracked {
        /// Runtime type of the entity.
        type_name: String,
    },

    /// A different entity already owns this server identity.
    #[error("a different entity is already tracked with identity {identity}")]
    IdentityConflict {
        /// The conflicting identity.
        identity: String,
    },

    /// The entity type is not registered in the client model.
    #[error("type {type_name} is not registered in the client model")]
    UnknownType {
        /// The unregistered type name.
        type_name: String,
    },

    /// The client model definition is inconsistent.
    #[error("invalid client model: {message}")]
    InvalidModel {
        /// Description of the problem.
        message: String,
    },

    /// An entity set name was required but empty.
    #[error("entity set name must not be empty")]
    EmptyEntitySet,

    /// An attach operation was given no server identity.
    #[error("attaching an entity requires a server identity")]
    MissingIdentity,

    /// A navigation property name contained a path separator or was empty.
    #[error("invalid navigation property name: {property:?}")]
    InvalidPropertyName {
        /// The rejected name.
        property: String,
    },

    /// The navigation property does not exist on the source type.
    #[error("type {type_name} has no navigation property {property}")]
    NoSuchNavigationProperty {
        /// Source type.
        type_name: String,
        /// Requested property.
        property: String,
    },

    /// A collection navigation property was required.
    #[error("navigation property {property} is not collection-valued")]
    NotCollectionProperty {
        /// The property.
        property: String,
    },

    /// A reference (single-valued) navigation property was required.
    #[error("navigation property {property} is collection-valued")]
    NotReferenceProperty {
        /// The property.
        property: String,
    },

    /// The target type cannot be stored in the navigation property.
    #[error("type {target_type} is not assignable to {expected} for property {property}")]
    TypeNotAssignable {
        /// Runtime type of the target.
        target_type: String,
        /// The property.
        property: String,
        /// Declared element type of the property.
        expected: String,
    },

    /// The operation requires a non-null link target.
    #[error("a target entity is required for property {property}")]
    MissingLinkTarget {
        /// The property.
        property: String,
    },

    /// A relationship was requested with an endpoint that is being deleted.
    #[error("cannot add or attach a relationship with a deleted endpoint")]
    RelatedEndpointDeleted,

    /// A relationship was requested with an endpoint that was never sent.
    #[error("cannot attach or delete a relationship with an added endpoint")]
    RelatedEndpointAdded,

    /// The relationship is already tracked.
    #[error("relationship through {property} is already tracked")]
    LinkAlreadyTracked {
        /// The property.
        property: String,
    },

    /// The requested state transition is not allowed.
    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: EntityState,
        /// Requested state.
        to: EntityState,
    },

    /// Added can only be entered through an add operation.
    #[error("entities can only enter the Added state through an add operation")]
    CannotForceAdded,

    /// An Added entity created through a navigation property of this
    /// entity still depends on it.
    #[error("entity of type {type_name} cannot be detached while an added related entity depends on it")]
    ChildResourceExists {
        /// The parent type.
        type_name: String,
    },

    /// The entity type does not carry a default media stream.
    #[error("type {type_name} is not a media link entry")]
    NoDefaultStream {
        /// The type.
        type_name: String,
    },

    /// The named stream is neither declared nor reported by the server.
    #[error("type {type_name} has no named stream {stream}")]
    UnknownStream {
        /// The type.
        type_name: String,
        /// The stream name.
        stream: String,
    },

    /// Streams cannot be set on an entity in this state.
    #[error("cannot set a named stream on an entity in state {state}")]
    InvalidStreamState {
        /// The entity state.
        state: EntityState,
    },
}

impl TrackingError {
    /// Creates a not-tracked error for a type.
    pub fn not_tracked(type_name: impl Into<String>) -> Self {
        Self::NotTracked {
            type_name: type_name.into(),
        }
    }

    /// Creates an invalid model error.
    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel {
            message: message.into(),
        }
    }

    /// Creates an invalid transition error.
    pub fn transition(from: EntityState, to: EntityState) -> Self {
        Self::InvalidTransition { from, to }
    }
}
