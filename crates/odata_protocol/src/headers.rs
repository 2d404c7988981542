//! Header collection and well-known header names.

use crate::error::{ProtocolError, ProtocolResult};
use crate::version::ProtocolVersion;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::trace;

/// Well-known header names.
pub mod names {
    /// Protocol version of the payload.
    pub const DATA_SERVICE_VERSION: &str = "DataServiceVersion";
    /// Highest protocol version the client understands.
    pub const MAX_DATA_SERVICE_VERSION: &str = "MaxDataServiceVersion";
    /// Accepted media types.
    pub const ACCEPT: &str = "Accept";
    /// Accepted charsets.
    pub const ACCEPT_CHARSET: &str = "Accept-Charset";
    /// Payload media type.
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// Payload length.
    pub const CONTENT_LENGTH: &str = "Content-Length";
    /// Batch part identifier.
    pub const CONTENT_ID: &str = "Content-ID";
    /// Optimistic concurrency precondition.
    pub const IF_MATCH: &str = "If-Match";
    /// Response preference.
    pub const PREFER: &str = "Prefer";
    /// Response preference honored by the server.
    pub const PREFERENCE_APPLIED: &str = "Preference-Applied";
    /// Suggested name of a new media resource.
    pub const SLUG: &str = "Slug";
    /// URI of a created resource.
    pub const LOCATION: &str = "Location";
    /// Concurrency token of the returned resource.
    pub const ETAG: &str = "ETag";
    /// Method carried by a tunneled POST.
    pub const X_HTTP_METHOD: &str = "X-HTTP-Method";
}

/// Ordered header list with case-insensitive names.
///
/// Setting an existing header replaces its value in place, so the wire
/// order is the order in which names were first set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderCollection {
    entries: Vec<(String, String)>,
}

impl HeaderCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Returns a header value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    /// Returns true if the header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Sets a header, replacing any existing value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Sets a header only if it is absent.
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if !self.contains(&name) {
            self.entries.push((name, value.into()));
        }
    }

    /// Removes a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Iterates `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parses the `DataServiceVersion` header, if present.
    pub fn data_service_version(&self) -> ProtocolResult<Option<ProtocolVersion>> {
        self.get(names::DATA_SERVICE_VERSION)
            .map(ProtocolVersion::parse)
            .transpose()
    }

    /// Records the version a request requires.
    ///
    /// Fails if `required` exceeds `ceiling`. The `DataServiceVersion`
    /// header becomes the larger of `required` and whatever an earlier
    /// call recorded: versions are only ever raised. The ceiling is sent
    /// as `MaxDataServiceVersion`. Returns the recorded version.
    pub fn set_request_version(
        &mut self,
        required: ProtocolVersion,
        ceiling: ProtocolVersion,
    ) -> ProtocolResult<ProtocolVersion> {
        required.ensure_within(ceiling)?;
        let current = self.data_service_version().ok().flatten();
        let effective = current.map_or(required, |c| c.max(required));
        trace!(%required, ?current, %effective, "request version");

        self.set(names::DATA_SERVICE_VERSION, effective.header_value());
        self.set(names::MAX_DATA_SERVICE_VERSION, ceiling.header_value());
        Ok(effective)
    }

    /// Converts into an `http` header map for transports built on it.
    pub fn to_header_map(&self) -> ProtocolResult<HeaderMap> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProtocolError::invalid_header(name, e.to_string()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| ProtocolError::invalid_header(name, e.to_string()))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }

    /// Builds a collection from an `http` header map.
    ///
    /// Values that are not visible ASCII are skipped.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            if let Ok(value) = value.to_str() {
                headers.set(name.as_str(), value);
            }
        }
        headers
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for HeaderCollection {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}
