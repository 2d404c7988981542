//! Client type metadata.
//!
//! The model is an explicit table of entity types registered at load time.
//! It is consulted by relatability validation and by the stream operations
//! instead of inspecting host types at runtime.

use crate::error::{TrackingError, TrackingResult};
use std::collections::{HashMap, HashSet};

/// A navigation property declared on an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationProperty {
    /// Property name.
    pub name: String,
    /// Declared element type of the property.
    pub target_type: String,
    /// Whether the property is collection-valued.
    pub is_collection: bool,
}

/// Metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTypeInfo {
    /// Type name.
    pub name: String,
    /// Base type name, if derived.
    pub base_type: Option<String>,
    /// Key property names.
    pub key_properties: Vec<String>,
    /// Declared navigation properties (not including inherited ones).
    pub navigation_properties: Vec<NavigationProperty>,
    /// Whether the type is a media link entry with a default stream.
    pub has_stream: bool,
    /// Declared named streams.
    pub named_streams: Vec<String>,
}

impl EntityTypeInfo {
    /// Creates a type with no properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_type: None,
            key_properties: Vec::new(),
            navigation_properties: Vec::new(),
            has_stream: false,
            named_streams: Vec::new(),
        }
    }

    /// Sets the base type.
    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base_type = Some(base.into());
        self
    }

    /// Adds a key property.
    pub fn with_key(mut self, property: impl Into<String>) -> Self {
        self.key_properties.push(property.into());
        self
    }

    /// Adds a single-valued navigation property.
    pub fn with_reference(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.navigation_properties.push(NavigationProperty {
            name: name.into(),
            target_type: target.into(),
            is_collection: false,
        });
        self
    }

    /// Adds a collection-valued navigation property.
    pub fn with_collection(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.navigation_properties.push(NavigationProperty {
            name: name.into(),
            target_type: target.into(),
            is_collection: true,
        });
        self
    }

    /// Marks the type as a media link entry.
    pub fn with_stream(mut self) -> Self {
        self.has_stream = true;
        self
    }

    /// Declares a named stream.
    pub fn with_named_stream(mut self, name: impl Into<String>) -> Self {
        self.named_streams.push(name.into());
        self
    }
}

/// Registered entity types keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct ClientModel {
    types: HashMap<String, EntityTypeInfo>,
}

impl ClientModel {
    /// Starts building a model.
    #[must_use]
    pub fn builder() -> ClientModelBuilder {
        ClientModelBuilder::default()
    }

    /// Looks up a type.
    #[must_use]
    pub fn entity_type(&self, name: &str) -> Option<&EntityTypeInfo> {
        self.types.get(name)
    }

    /// Looks up a type, failing if it is not registered.
    pub fn require_type(&self, name: &str) -> TrackingResult<&EntityTypeInfo> {
        self.types
            .get(name)
            .ok_or_else(|| TrackingError::UnknownType {
                type_name: name.to_string(),
            })
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Iterates a type and its base types, most derived first.
    fn lineage<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a EntityTypeInfo> + 'a {
        let mut next = self.types.get(name);
        std::iter::from_fn(move || {
            let current = next?;
            next = current
                .base_type
                .as_deref()
                .and_then(|base| self.types.get(base));
            Some(current)
        })
    }

    /// Finds a navigation property on a type or any of its base types.
    #[must_use]
    pub fn navigation_property(&self, type_name: &str, property: &str) -> Option<&NavigationProperty> {
        self.lineage(type_name)
            .flat_map(|t| t.navigation_properties.iter())
            .find(|p| p.name == property)
    }

    /// Returns true if a value of `derived` can be stored where `target` is expected.
    #[must_use]
    pub fn is_assignable(&self, derived: &str, target: &str) -> bool {
        self.lineage(derived).any(|t| t.name == target)
    }

    /// Returns true if the type (or a base type) is a media link entry.
    #[must_use]
    pub fn has_stream(&self, type_name: &str) -> bool {
        self.lineage(type_name).any(|t| t.has_stream)
    }

    /// Returns true if the type (or a base type) declares the named stream.
    #[must_use]
    pub fn has_named_stream(&self, type_name: &str, stream: &str) -> bool {
        self.lineage(type_name)
            .any(|t| t.named_streams.iter().any(|s| s == stream))
    }

    /// Returns the key properties of a type, inherited from the nearest
    /// type in the lineage that declares them.
    #[must_use]
    pub fn key_properties(&self, type_name: &str) -> &[String] {
        self.lineage(type_name)
            .find(|t| !t.key_properties.is_empty())
            .map(|t| t.key_properties.as_slice())
            .unwrap_or(&[])
    }
}

/// Builder for [`ClientModel`].
#[derive(Debug, Default)]
pub struct ClientModelBuilder {
    types: Vec<EntityTypeInfo>,
}

impl ClientModelBuilder {
    /// Registers an entity type.
    #[must_use]
    pub fn entity_type(mut self, info: EntityTypeInfo) -> Self {
        self.types.push(info);
        self
    }

    /// Validates the registrations and builds the model.
    ///
    /// Fails on duplicate type names, unknown base or navigation target
    /// types, base type cycles and navigation names containing `/`.
    pub fn build(self) -> TrackingResult<ClientModel> {
        let mut types = HashMap::with_capacity(self.types.len());
        for info in self.types {
            if info.name.is_empty() {
                return Err(TrackingError::invalid_model("type name must not be empty"));
            }
            if types.contains_key(&info.name) {
                return Err(TrackingError::invalid_model(format!(
                    "type {} registered twice",
                    info.name
                )));
            }
            types.insert(info.name.clone(), info);
        }

        for info in types.values() {
            if let Some(base) = &info.base_type {
                if !types.contains_key(base) {
                    return Err(TrackingError::invalid_model(format!(
                        "base type {base} of {} is not registered",
                        info.name
                    )));
                }
            }
            for nav in &info.navigation_properties {
                if nav.name.is_empty() || nav.name.contains('/') {
                    return Err(TrackingError::InvalidPropertyName {
                        property: nav.name.clone(),
                    });
                }
                if !types.contains_key(&nav.target_type) {
                    return Err(TrackingError::invalid_model(format!(
                        "navigation target {} of {}.{} is not registered",
                        nav.target_type, info.name, nav.name
                    )));
                }
            }
        }

        for name in types.keys() {
            let mut seen = HashSet::new();
            let mut current = Some(name);
            while let Some(type_name) = current {
                if !seen.insert(type_name) {
                    return Err(TrackingError::invalid_model(format!(
                        "base type cycle through {type_name}"
                    )));
                }
                current = types.get(type_name).and_then(|t| t.base_type.as_ref());
            }
        }

        Ok(ClientModel { types })
    }
}
