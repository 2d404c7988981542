//! A JSON payload serializer for the sample types.
//!
//! Entries go on the wire as
//!
//! ```json
//! {"type": "Customer", "id": "...", "editLink": "...", "etag": "...",
//!  "properties": {"id": 1, "name": "Ann"}}
//! ```
//!
//! and feeds as `{"value": [entry, ...]}`. Only the metadata fields the
//! client consumes are modeled.

use crate::fixtures::{Customer, Order, Photo, PreferredCustomer};
use bytes::Bytes;
use odata_client::PayloadSerializer;
use odata_protocol::ResponseMessage;
use odata_tracking::{
    ClientEntity, EntityDescriptor, EntityRef, EntryMetadata, MaterializedEntry, NamedStreamInfo,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Named stream metadata on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireStream {
    /// Stream name.
    pub name: String,
    /// Read link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_link: Option<String>,
    /// Edit link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_link: Option<String>,
    /// Content type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// ETag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// One entry on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireEntry {
    /// Entity type name.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Entity set the entry belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<String>,
    /// Identity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Edit link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_link: Option<String>,
    /// Read link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_link: Option<String>,
    /// ETag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Read link of the default stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_read_link: Option<String>,
    /// Edit link of the default stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_edit_link: Option<String>,
    /// ETag of the default stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_etag: Option<String>,
    /// Named streams.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub streams: Vec<WireStream>,
    /// Entity properties.
    pub properties: Value,
}

impl WireEntry {
    /// Server metadata carried by the entry.
    pub fn metadata(&self) -> EntryMetadata {
        EntryMetadata {
            identity: self.id.clone(),
            edit_link: self.edit_link.clone(),
            self_link: self.read_link.clone(),
            etag: self.etag.clone(),
            server_type_name: self.type_name.clone(),
            read_stream_uri: self.media_read_link.clone(),
            edit_stream_uri: self.media_edit_link.clone(),
            stream_etag: self.media_etag.clone(),
            named_streams: self
                .streams
                .iter()
                .map(|s| NamedStreamInfo {
                    name: s.name.clone(),
                    self_link: s.read_link.clone(),
                    edit_link: s.edit_link.clone(),
                    content_type: s.content_type.clone(),
                    etag: s.etag.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireFeed {
    value: Vec<WireEntry>,
}

/// Serializes the sample entity types as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    /// Creates a serializer.
    pub fn new() -> Self {
        Self
    }

    /// JSON properties of a sample entity.
    pub fn properties(entity: &EntityRef) -> Result<Value, String> {
        fn to_value<T: Serialize>(value: &T) -> Result<Value, String> {
            serde_json::to_value(value).map_err(|e| e.to_string())
        }

        if let Some(c) = entity.downcast_ref::<Customer>() {
            to_value(c)
        } else if let Some(c) = entity.downcast_ref::<PreferredCustomer>() {
            to_value(c)
        } else if let Some(o) = entity.downcast_ref::<Order>() {
            to_value(o)
        } else if let Some(p) = entity.downcast_ref::<Photo>() {
            to_value(p)
        } else {
            Err(format!("cannot serialize entity type {}", entity.type_name()))
        }
    }

    /// Creates a sample entity from its wire form.
    pub fn entity(type_name: &str, properties: Value) -> Result<EntityRef, String> {
        fn from_value<T: DeserializeOwned + ClientEntity>(value: Value) -> Result<EntityRef, String> {
            serde_json::from_value::<T>(value)
                .map(EntityRef::new)
                .map_err(|e| e.to_string())
        }

        match type_name {
            "Customer" => from_value::<Customer>(properties),
            "PreferredCustomer" => from_value::<PreferredCustomer>(properties),
            "Order" => from_value::<Order>(properties),
            "Photo" => from_value::<Photo>(properties),
            other => Err(format!("unknown entity type {other}")),
        }
    }

    fn parse_entries(body: &[u8]) -> Result<Vec<WireEntry>, String> {
        let value: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        if value.get("value").is_some_and(Value::is_array) {
            let feed: WireFeed = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(feed.value)
        } else {
            let entry: WireEntry = serde_json::from_value(value).map_err(|e| e.to_string())?;
            Ok(vec![entry])
        }
    }
}

impl PayloadSerializer for JsonSerializer {
    fn write_entry(&self, descriptor: &EntityDescriptor, _content_type: &str) -> Result<Bytes, String> {
        let entry = WireEntry {
            type_name: Some(descriptor.entity().type_name().to_string()),
            etag: descriptor.etag().map(str::to_string),
            properties: Self::properties(descriptor.entity())?,
            ..WireEntry::default()
        };
        serde_json::to_vec(&entry)
            .map(Bytes::from)
            .map_err(|e| e.to_string())
    }

    fn write_link(&self, target_uri: &str, _content_type: &str) -> Result<Bytes, String> {
        serde_json::to_vec(&serde_json::json!({ "uri": target_uri }))
            .map(Bytes::from)
            .map_err(|e| e.to_string())
    }

    fn read_entry(&self, response: &ResponseMessage) -> Result<EntryMetadata, String> {
        let entry: WireEntry = serde_json::from_slice(&response.body).map_err(|e| e.to_string())?;
        Ok(entry.metadata())
    }

    fn read_entries(&self, response: &ResponseMessage) -> Result<Vec<MaterializedEntry>, String> {
        Self::parse_entries(&response.body)?
            .into_iter()
            .map(|wire| {
                let type_name = wire
                    .type_name
                    .clone()
                    .ok_or_else(|| "entry has no type".to_string())?;
                let entity = Self::entity(&type_name, wire.properties.clone())?;
                let entry = MaterializedEntry::new(entity, wire.metadata());
                Ok(match wire.entity_set {
                    Some(set) => entry.in_set(set),
                    None => entry,
                })
            })
            .collect()
    }
}
