//! URI resolution.

use crate::error::{ClientError, ClientResult};
use odata_tracking::EntityDescriptor;
use url::Url;

/// Resolves entity sets and server links to absolute URIs.
pub trait UriResolver: Send + Sync {
    /// URI of an entity set.
    fn entity_set_uri(&self, entity_set: &str) -> ClientResult<String>;

    /// Makes a server-provided link absolute.
    fn resolve(&self, link: &str) -> ClientResult<String>;

    /// URI of the `$batch` endpoint.
    fn batch_uri(&self) -> ClientResult<String>;
}

/// Resolves everything against a service root.
#[derive(Debug, Clone)]
pub struct BaseUriResolver {
    base: Url,
}

impl BaseUriResolver {
    /// Creates a resolver. A missing trailing `/` is added so that relative
    /// links resolve below the root rather than beside it.
    pub fn new(base_uri: &str) -> ClientResult<Self> {
        let mut base = Url::parse(base_uri)
            .map_err(|e| ClientError::uri(format!("invalid base uri {base_uri:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::uri(format!("{base_uri:?} cannot be a base uri")));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { base })
    }

    /// The normalized service root.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    fn join(&self, relative: &str) -> ClientResult<String> {
        self.base
            .join(relative)
            .map(String::from)
            .map_err(|e| ClientError::uri(format!("cannot resolve {relative:?}: {e}")))
    }
}

impl UriResolver for BaseUriResolver {
    fn entity_set_uri(&self, entity_set: &str) -> ClientResult<String> {
        if entity_set.is_empty() {
            return Err(ClientError::uri("entity set name is empty"));
        }
        self.join(entity_set.trim_start_matches('/'))
    }

    fn resolve(&self, link: &str) -> ClientResult<String> {
        if Url::parse(link).is_ok() {
            return Ok(link.to_string());
        }
        self.join(link.trim_start_matches('/'))
    }

    fn batch_uri(&self) -> ClientResult<String> {
        self.join("$batch")
    }
}

/// Edit URI of a tracked entity: its edit link, else its identity.
pub fn entity_uri(resolver: &dyn UriResolver, descriptor: &EntityDescriptor) -> ClientResult<String> {
    let link = descriptor
        .edit_link()
        .or_else(|| descriptor.identity())
        .ok_or_else(|| {
            ClientError::uri(format!(
                "entity of type {} has no edit link",
                descriptor.entity().type_name()
            ))
        })?;
    resolver.resolve(link)
}

/// `<entity>/$links/<property>`.
#[must_use]
pub fn links_uri(entity_uri: &str, property: &str) -> String {
    format!("{}/$links/{property}", entity_uri.trim_end_matches('/'))
}

/// `<entity>/<property>`, the insert target of a related entity.
#[must_use]
pub fn navigation_uri(entity_uri: &str, property: &str) -> String {
    format!("{}/{property}", entity_uri.trim_end_matches('/'))
}

/// `<entity>/$value`, the default stream of a media link entry.
#[must_use]
pub fn value_uri(entity_uri: &str) -> String {
    format!("{}/$value", entity_uri.trim_end_matches('/'))
}

/// Key predicate of the last path segment, e.g. `('42')` in
/// `http://host/Customers('42')`.
#[must_use]
pub fn key_segment(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let last = path.rsplit('/').next()?;
    let open = last.rfind('(')?;
    let predicate = &last[open..];
    predicate.ends_with(')').then_some(predicate)
}
