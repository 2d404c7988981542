//! Sample entity types and client helpers.
//!
//! The sample model is a small customer/order/photo service:
//!
//! - `Customer` has an `Orders` collection and a `BestFriend` reference
//! - `PreferredCustomer` derives from `Customer`
//! - `Order` has a `Customer` reference
//! - `Photo` is a media link entry with a `Thumbnail` named stream

use crate::serializer::JsonSerializer;
use crate::service::InMemoryService;
use odata_client::{ClientSettings, DataServiceContext, MockTransport, ModelCache};
use odata_tracking::{ClientEntity, ClientModel, EntityTypeInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Service root used by every helper.
pub const SERVICE_ROOT: &str = "http://host/svc/";

/// A customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Key.
    pub id: u32,
    /// Display name.
    pub name: String,
}

impl Customer {
    /// Creates a customer.
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
        }
    }
}

impl ClientEntity for Customer {
    fn type_name(&self) -> &str {
        "Customer"
    }
}

/// A customer with a discount, derived from `Customer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredCustomer {
    /// Key.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Discount in percent.
    pub discount: u8,
}

impl ClientEntity for PreferredCustomer {
    fn type_name(&self) -> &str {
        "PreferredCustomer"
    }
}

/// An order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Key.
    pub id: u32,
    /// Amount in cents.
    pub amount: u64,
}

impl Order {
    /// Creates an order.
    pub fn new(id: u32, amount: u64) -> Self {
        Self { id, amount }
    }
}

impl ClientEntity for Order {
    fn type_name(&self) -> &str {
        "Order"
    }
}

/// A photo: a media link entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    /// Key.
    pub id: u32,
    /// Caption.
    pub caption: String,
}

impl Photo {
    /// Creates a photo.
    pub fn new(id: u32, caption: &str) -> Self {
        Self {
            id,
            caption: caption.to_string(),
        }
    }
}

impl ClientEntity for Photo {
    fn type_name(&self) -> &str {
        "Photo"
    }
}

/// Builds the sample model.
pub fn sample_model() -> ClientModel {
    ClientModel::builder()
        .entity_type(
            EntityTypeInfo::new("Customer")
                .with_key("ID")
                .with_collection("Orders", "Order")
                .with_reference("BestFriend", "Customer"),
        )
        .entity_type(
            EntityTypeInfo::new("PreferredCustomer")
                .with_base("Customer")
                .with_key("ID"),
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
        .expect("sample model is valid")
}

/// A model cache that serves the sample model at every version.
pub fn sample_model_cache() -> ModelCache {
    ModelCache::new(|_| Ok(sample_model()))
}

/// Default settings for [`SERVICE_ROOT`].
pub fn settings() -> ClientSettings {
    ClientSettings::new(SERVICE_ROOT)
}

/// A context over a scripted transport.
pub fn mock_context_with(settings: ClientSettings) -> DataServiceContext<MockTransport> {
    DataServiceContext::new(
        settings,
        Arc::new(sample_model()),
        Arc::new(MockTransport::new()),
        Arc::new(JsonSerializer::new()),
    )
    .expect("Failed to create context")
}

/// A context over a scripted transport with default settings.
pub fn mock_context() -> DataServiceContext<MockTransport> {
    mock_context_with(settings())
}

/// A context over a fresh in-memory service.
pub fn service_context_with(settings: ClientSettings) -> DataServiceContext<InMemoryService> {
    DataServiceContext::new(
        settings,
        Arc::new(sample_model()),
        Arc::new(InMemoryService::new(SERVICE_ROOT)),
        Arc::new(JsonSerializer::new()),
    )
    .expect("Failed to create context")
}

/// A context over a fresh in-memory service with default settings.
pub fn service_context() -> DataServiceContext<InMemoryService> {
    service_context_with(settings())
}
