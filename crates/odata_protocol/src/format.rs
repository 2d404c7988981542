//! Format negotiation.
//!
//! Picks one concrete media type for a payload from the configured
//! format, the protocol ceiling and the request shape.

use crate::error::{ProtocolError, ProtocolResult};
use crate::version::ProtocolVersion;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Media type strings.
pub mod media_types {
    /// Atom entries and feeds.
    pub const ATOM: &str = "application/atom+xml";
    /// Accept header for Atom reads.
    pub const ATOM_ACCEPT: &str = "application/atom+xml,application/xml";
    /// Plain XML (properties, links, errors).
    pub const XML: &str = "application/xml";
    /// JSON light with minimal metadata.
    pub const JSON_MINIMAL: &str = "application/json;odata=minimalmetadata";
    /// JSON light with full metadata.
    pub const JSON_FULL: &str = "application/json;odata=fullmetadata";
    /// JSON verbose.
    pub const JSON_VERBOSE: &str = "application/json;odata=verbose";
    /// Raw values and counts.
    pub const TEXT_PLAIN: &str = "text/plain";
    /// Any media type, used for streams.
    pub const ANY: &str = "*/*";
    /// Batch envelopes.
    pub const MULTIPART_MIXED: &str = "multipart/mixed";
    /// A single HTTP message inside a batch.
    pub const APPLICATION_HTTP: &str = "application/http";
}

/// Configured payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ODataFormat {
    /// Atom/XML.
    #[default]
    Atom,
    /// JSON light. Requires protocol version 3.0.
    Json,
}

/// Kind of payload being read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// A single entity.
    Entry,
    /// A set of entities.
    Feed,
    /// A single property.
    Property,
    /// A collection of primitive or complex values.
    Collection,
    /// `$links` payloads.
    EntityReferenceLinks,
    /// `$count` results.
    Count,
    /// `$value` raw values.
    Value,
    /// Media resources and named streams.
    Stream,
    /// Batch envelopes.
    Batch,
    /// Service operation and action parameters.
    Parameters,
    /// Error payloads.
    Error,
}

impl PayloadKind {
    /// Returns true if JSON light needs a service model for this kind.
    #[must_use]
    pub fn needs_model(self) -> bool {
        !matches!(
            self,
            Self::Count | Self::Value | Self::Stream | Self::Batch | Self::Parameters
        )
    }
}

/// Requested JSON light metadata level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataLevel {
    /// Only what cannot be computed from the model.
    Minimal,
    /// Every link and type annotation.
    Full,
}

/// A loaded `$metadata` document.
///
/// Opaque to the core; only its presence matters for negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceModel {
    document: Bytes,
}

impl ServiceModel {
    /// Wraps a metadata document.
    pub fn new(document: impl Into<Bytes>) -> Self {
        Self {
            document: document.into(),
        }
    }

    /// The raw document.
    #[must_use]
    pub fn document(&self) -> &Bytes {
        &self.document
    }
}

/// Chooses media types for one client configuration.
#[derive(Debug, Clone)]
pub struct FormatNegotiator {
    format: ODataFormat,
    ceiling: ProtocolVersion,
    service_model: Option<Arc<ServiceModel>>,
}

impl FormatNegotiator {
    /// Creates a negotiator.
    ///
    /// JSON is only selectable under a V3 ceiling. The service model check
    /// is deferred until a payload that needs it is negotiated.
    pub fn new(format: ODataFormat, ceiling: ProtocolVersion) -> ProtocolResult<Self> {
        if format == ODataFormat::Json && ceiling < ProtocolVersion::V3 {
            return Err(ProtocolError::JsonRequiresV3 { ceiling });
        }
        Ok(Self {
            format,
            ceiling,
            service_model: None,
        })
    }

    /// Supplies the service model used by JSON light.
    pub fn with_service_model(mut self, model: Arc<ServiceModel>) -> Self {
        self.service_model = Some(model);
        self
    }

    /// Configured format.
    #[must_use]
    pub fn format(&self) -> ODataFormat {
        self.format
    }

    /// Protocol ceiling.
    #[must_use]
    pub fn ceiling(&self) -> ProtocolVersion {
        self.ceiling
    }

    /// The service model, if loaded.
    #[must_use]
    pub fn service_model(&self) -> Option<&Arc<ServiceModel>> {
        self.service_model.as_ref()
    }

    /// Returns true if payloads of this kind are JSON light.
    #[must_use]
    pub fn uses_json_light(&self, kind: PayloadKind) -> bool {
        self.format == ODataFormat::Json
            && !matches!(
                kind,
                PayloadKind::Count | PayloadKind::Value | PayloadKind::Stream | PayloadKind::Batch
            )
    }

    fn require_model(&self, kind: PayloadKind) -> ProtocolResult<()> {
        if kind.needs_model() && self.service_model.is_none() {
            return Err(ProtocolError::ServiceModelRequired { kind });
        }
        Ok(())
    }

    fn common(kind: PayloadKind) -> Option<&'static str> {
        match kind {
            PayloadKind::Count | PayloadKind::Value => Some(media_types::TEXT_PLAIN),
            PayloadKind::Stream => Some(media_types::ANY),
            PayloadKind::Batch => Some(media_types::MULTIPART_MIXED),
            _ => None,
        }
    }

    /// Metadata level for a JSON light read.
    #[must_use]
    pub fn metadata_level(has_select: bool) -> MetadataLevel {
        if has_select {
            MetadataLevel::Full
        } else {
            MetadataLevel::Minimal
        }
    }

    /// Media type for the `Accept` header of a read.
    pub fn accept(&self, kind: PayloadKind, has_select: bool) -> ProtocolResult<&'static str> {
        if let Some(media) = Self::common(kind) {
            return Ok(media);
        }
        match self.format {
            ODataFormat::Atom => Ok(match kind {
                PayloadKind::Entry | PayloadKind::Feed => media_types::ATOM_ACCEPT,
                PayloadKind::Parameters => media_types::JSON_VERBOSE,
                _ => media_types::XML,
            }),
            ODataFormat::Json => {
                self.require_model(kind)?;
                Ok(match Self::metadata_level(has_select) {
                    MetadataLevel::Full => media_types::JSON_FULL,
                    MetadataLevel::Minimal => media_types::JSON_MINIMAL,
                })
            }
        }
    }

    /// Media type for the `Content-Type` header of a write.
    pub fn content_type(&self, kind: PayloadKind) -> ProtocolResult<&'static str> {
        if let Some(media) = Self::common(kind) {
            return Ok(media);
        }
        match self.format {
            ODataFormat::Atom => Ok(match kind {
                PayloadKind::Entry | PayloadKind::Feed => media_types::ATOM,
                PayloadKind::Parameters => media_types::JSON_VERBOSE,
                _ => media_types::XML,
            }),
            ODataFormat::Json => {
                self.require_model(kind)?;
                Ok(media_types::JSON_MINIMAL)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json() -> FormatNegotiator {
        FormatNegotiator::new(ODataFormat::Json, ProtocolVersion::V3)
            .unwrap()
            .with_service_model(Arc::new(ServiceModel::new("<edmx/>")))
    }

    #[test]
    fn json_needs_v3() {
        assert_eq!(
            FormatNegotiator::new(ODataFormat::Json, ProtocolVersion::V2).unwrap_err(),
            ProtocolError::JsonRequiresV3 {
                ceiling: ProtocolVersion::V2
            }
        );
        assert!(FormatNegotiator::new(ODataFormat::Atom, ProtocolVersion::V1).is_ok());
    }

    #[test]
    fn atom_media_types() {
        let n = FormatNegotiator::new(ODataFormat::Atom, ProtocolVersion::V3).unwrap();
        assert_eq!(n.accept(PayloadKind::Feed, false).unwrap(), media_types::ATOM_ACCEPT);
        assert_eq!(n.content_type(PayloadKind::Entry).unwrap(), media_types::ATOM);
        assert_eq!(
            n.content_type(PayloadKind::EntityReferenceLinks).unwrap(),
            media_types::XML
        );
        assert_eq!(
            n.content_type(PayloadKind::Parameters).unwrap(),
            media_types::JSON_VERBOSE
        );
        assert!(!n.uses_json_light(PayloadKind::Entry));
    }

    #[test]
    fn json_metadata_level_follows_select() {
        let n = json();
        assert_eq!(n.accept(PayloadKind::Entry, false).unwrap(), media_types::JSON_MINIMAL);
        assert_eq!(n.accept(PayloadKind::Feed, true).unwrap(), media_types::JSON_FULL);
        assert!(n.uses_json_light(PayloadKind::Entry));
    }

    #[test]
    fn json_without_model_fails_only_when_needed() {
        let n = FormatNegotiator::new(ODataFormat::Json, ProtocolVersion::V3).unwrap();
        assert_eq!(
            n.accept(PayloadKind::Entry, false).unwrap_err(),
            ProtocolError::ServiceModelRequired {
                kind: PayloadKind::Entry
            }
        );
        assert_eq!(
            n.content_type(PayloadKind::Parameters).unwrap(),
            media_types::JSON_MINIMAL
        );
    }

    #[test]
    fn streams_and_batches_ignore_format() {
        for n in [
            json(),
            FormatNegotiator::new(ODataFormat::Atom, ProtocolVersion::V1).unwrap(),
        ] {
            assert_eq!(n.accept(PayloadKind::Stream, true).unwrap(), media_types::ANY);
            assert_eq!(n.accept(PayloadKind::Batch, false).unwrap(), media_types::MULTIPART_MIXED);
            assert_eq!(n.accept(PayloadKind::Count, false).unwrap(), media_types::TEXT_PLAIN);
        }
    }
}
