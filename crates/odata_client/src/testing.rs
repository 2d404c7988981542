//! Entities, model and a line-based serializer shared by unit tests.

use crate::serializer::PayloadSerializer;
use bytes::Bytes;
use odata_protocol::ResponseMessage;
use odata_tracking::{
    ClientEntity, ClientModel, EntityDescriptor, EntityRef, EntityTypeInfo, EntryMetadata,
    MaterializedEntry,
};
use std::sync::Arc;

pub(crate) struct Customer {
    pub name: String,
}

impl Customer {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

impl ClientEntity for Customer {
    fn type_name(&self) -> &str {
        "Customer"
    }
}

pub(crate) struct Order;

impl ClientEntity for Order {
    fn type_name(&self) -> &str {
        "Order"
    }
}

pub(crate) struct Photo;

impl ClientEntity for Photo {
    fn type_name(&self) -> &str {
        "Photo"
    }
}

pub(crate) fn model() -> Arc<ClientModel> {
    let model = ClientModel::builder()
        .entity_type(
            EntityTypeInfo::new("Customer")
                .with_key("ID")
                .with_collection("Orders", "Order")
                .with_reference("BestFriend", "Customer"),
        )
        .entity_type(
            EntityTypeInfo::new("Order")
                .with_key("ID")
                .with_reference("Customer", "Customer"),
        )
        .entity_type(
            EntityTypeInfo::new("Photo")
                .with_key("ID")
                .with_stream()
                .with_named_stream("Thumbnail"),
        )
        .build()
        .unwrap();
    Arc::new(model)
}

/// Bodies are `key: value` lines; entries in a feed are separated by `---`.
///
/// Recognized keys: `id`, `edit`, `etag`, `name`, `stream-edit`,
/// `stream-etag`.
#[derive(Debug, Default)]
pub(crate) struct LineSerializer;

fn parse_entry(text: &str) -> (EntryMetadata, Option<String>) {
    let mut metadata = EntryMetadata::default();
    let mut name = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match key.trim() {
            "id" => metadata.identity = Some(value),
            "edit" => metadata.edit_link = Some(value),
            "etag" => metadata.etag = Some(value),
            "stream-edit" => metadata.edit_stream_uri = Some(value),
            "stream-etag" => metadata.stream_etag = Some(value),
            "name" => name = Some(value),
            _ => {}
        }
    }
    (metadata, name)
}

impl PayloadSerializer for LineSerializer {
    fn write_entry(&self, descriptor: &EntityDescriptor, _content_type: &str) -> Result<Bytes, String> {
        let mut body = format!("type: {}\n", descriptor.entity().type_name());
        if let Some(customer) = descriptor.entity().downcast_ref::<Customer>() {
            body.push_str(&format!("name: {}\n", customer.name));
        }
        Ok(Bytes::from(body))
    }

    fn write_link(&self, target_uri: &str, _content_type: &str) -> Result<Bytes, String> {
        Ok(Bytes::from(format!("uri: {target_uri}\n")))
    }

    fn read_entry(&self, response: &ResponseMessage) -> Result<EntryMetadata, String> {
        let text = std::str::from_utf8(&response.body).map_err(|e| e.to_string())?;
        Ok(parse_entry(text).0)
    }

    fn read_entries(&self, response: &ResponseMessage) -> Result<Vec<MaterializedEntry>, String> {
        let text = std::str::from_utf8(&response.body).map_err(|e| e.to_string())?;
        Ok(text
            .split("---")
            .filter(|block| !block.trim().is_empty())
            .map(|block| {
                let (metadata, name) = parse_entry(block);
                let entity = EntityRef::new(Customer::new(name.as_deref().unwrap_or("")));
                MaterializedEntry::new(entity, metadata).in_set("Customers")
            })
            .collect())
    }
}
