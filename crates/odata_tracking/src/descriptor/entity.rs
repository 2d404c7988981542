//! Entity descriptor.

use super::stream::{SaveStream, StreamDescriptor, StreamState};
use crate::entity::EntityRef;
use crate::types::{ChangeOrder, EntityState};
use std::collections::BTreeMap;

/// Source of an entity created through a navigation property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentLink {
    /// Entity owning the navigation property.
    pub source: EntityRef,
    /// Collection navigation property the entity is inserted through.
    pub property: String,
}

/// Server-reported metadata of a named stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamedStreamInfo {
    /// Stream name.
    pub name: String,
    /// Read link.
    pub self_link: Option<String>,
    /// Edit link.
    pub edit_link: Option<String>,
    /// Content type.
    pub content_type: Option<String>,
    /// ETag.
    pub etag: Option<String>,
}

/// Server-reported metadata of one entry.
///
/// Produced by the payload deserializer from a response body or from
/// response headers. Absent fields leave the descriptor untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Canonical identity of the entry.
    pub identity: Option<String>,
    /// Edit link.
    pub edit_link: Option<String>,
    /// Read link.
    pub self_link: Option<String>,
    /// Optimistic concurrency token.
    pub etag: Option<String>,
    /// Server type name.
    pub server_type_name: Option<String>,
    /// Read link of the default stream.
    pub read_stream_uri: Option<String>,
    /// Edit link of the default stream.
    pub edit_stream_uri: Option<String>,
    /// ETag of the default stream.
    pub stream_etag: Option<String>,
    /// Named streams.
    pub named_streams: Vec<NamedStreamInfo>,
}

impl EntryMetadata {
    /// Creates metadata carrying only an identity.
    pub fn with_identity(identity: impl Into<String>) -> Self {
        Self {
            identity: Some(identity.into()),
            ..Self::default()
        }
    }

    /// Sets the edit link.
    pub fn edit_link(mut self, link: impl Into<String>) -> Self {
        self.edit_link = Some(link.into());
        self
    }

    /// Sets the ETag.
    pub fn etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Tracked state of one entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub(crate) entity: EntityRef,
    pub(crate) entity_set: Option<String>,
    pub(crate) identity: Option<String>,
    pub(crate) edit_link: Option<String>,
    pub(crate) self_link: Option<String>,
    pub(crate) etag: Option<String>,
    pub(crate) server_type_name: Option<String>,
    pub(crate) read_stream_uri: Option<String>,
    pub(crate) edit_stream_uri: Option<String>,
    pub(crate) stream_etag: Option<String>,
    pub(crate) state: EntityState,
    pub(crate) change_order: Option<ChangeOrder>,
    pub(crate) tracked_seq: u64,
    pub(crate) parent: Option<ParentLink>,
    pub(crate) save_stream: Option<SaveStream>,
    pub(crate) named_streams: BTreeMap<String, StreamDescriptor>,
}

impl EntityDescriptor {
    pub(crate) fn new(entity: EntityRef, state: EntityState) -> Self {
        Self {
            entity,
            entity_set: None,
            identity: None,
            edit_link: None,
            self_link: None,
            etag: None,
            server_type_name: None,
            read_stream_uri: None,
            edit_stream_uri: None,
            stream_etag: None,
            state,
            change_order: None,
            tracked_seq: 0,
            parent: None,
            save_stream: None,
            named_streams: BTreeMap::new(),
        }
    }

    /// The tracked object.
    #[must_use]
    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    /// Entity set the entity belongs to, if known.
    #[must_use]
    pub fn entity_set(&self) -> Option<&str> {
        self.entity_set.as_deref()
    }

    /// Server identity.
    #[must_use]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Edit link.
    #[must_use]
    pub fn edit_link(&self) -> Option<&str> {
        self.edit_link.as_deref()
    }

    /// Read link.
    #[must_use]
    pub fn self_link(&self) -> Option<&str> {
        self.self_link.as_deref()
    }

    /// Optimistic concurrency token. Never interpreted.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Server type name.
    #[must_use]
    pub fn server_type_name(&self) -> Option<&str> {
        self.server_type_name.as_deref()
    }

    /// Read link of the default stream.
    #[must_use]
    pub fn read_stream_uri(&self) -> Option<&str> {
        self.read_stream_uri.as_deref()
    }

    /// Edit link of the default stream.
    #[must_use]
    pub fn edit_stream_uri(&self) -> Option<&str> {
        self.edit_stream_uri.as_deref()
    }

    /// ETag of the default stream.
    #[must_use]
    pub fn stream_etag(&self) -> Option<&str> {
        self.stream_etag.as_deref()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Change order, if the descriptor has a pending change.
    #[must_use]
    pub fn change_order(&self) -> Option<ChangeOrder> {
        self.change_order
    }

    /// Parent for entities created through a navigation property.
    #[must_use]
    pub fn parent(&self) -> Option<&ParentLink> {
        self.parent.as_ref()
    }

    /// Pending default stream payload.
    #[must_use]
    pub fn save_stream(&self) -> Option<&SaveStream> {
        self.save_stream.as_ref()
    }

    /// Looks up a named stream.
    #[must_use]
    pub fn named_stream(&self, name: &str) -> Option<&StreamDescriptor> {
        self.named_streams.get(name)
    }

    /// Iterates named streams by name.
    pub fn named_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.named_streams.values()
    }

    /// Named streams with a pending upload.
    pub fn modified_named_streams(&self) -> impl Iterator<Item = &StreamDescriptor> {
        self.named_streams
            .values()
            .filter(|s| s.state == StreamState::Modified)
    }

    /// Returns true if the next save has to send anything for this entity.
    #[must_use]
    pub fn has_pending_changes(&self) -> bool {
        self.state.is_dirty()
            || self.save_stream.is_some()
            || self.modified_named_streams().next().is_some()
    }

    /// Returns true for a media link entry about to be created with its stream.
    #[must_use]
    pub fn is_media_link_insert(&self) -> bool {
        self.state == EntityState::Added && self.save_stream.is_some()
    }

    /// Applies server-reported links and tokens, leaving absent fields as is.
    ///
    /// The identity is not applied here; identities are owned by the
    /// tracker's identity index.
    pub(crate) fn apply_metadata(&mut self, metadata: &EntryMetadata) {
        fn set(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        set(&mut self.edit_link, &metadata.edit_link);
        set(&mut self.self_link, &metadata.self_link);
        set(&mut self.etag, &metadata.etag);
        set(&mut self.server_type_name, &metadata.server_type_name);
        set(&mut self.read_stream_uri, &metadata.read_stream_uri);
        set(&mut self.edit_stream_uri, &metadata.edit_stream_uri);
        set(&mut self.stream_etag, &metadata.stream_etag);

        for info in &metadata.named_streams {
            let stream = self
                .named_streams
                .entry(info.name.clone())
                .or_insert_with(|| StreamDescriptor::new(info.name.clone()));
            set(&mut stream.self_link, &info.self_link);
            set(&mut stream.edit_link, &info.edit_link);
            set(&mut stream.content_type, &info.content_type);
            set(&mut stream.etag, &info.etag);
        }
    }
}
