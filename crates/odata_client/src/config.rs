//! Client settings.

use crate::error::{ClientError, ClientResult};
use odata_protocol::{ODataFormat, ProtocolVersion};
use odata_tracking::MergeOption;
use serde::{Deserialize, Serialize};

/// What the server should return for inserts and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResponsePreference {
    /// No `Prefer` header.
    #[default]
    None,
    /// `Prefer: return-content`.
    IncludeContent,
    /// `Prefer: return-no-content`.
    NoContent,
}

impl ResponsePreference {
    /// The `Prefer` header value, if any.
    #[must_use]
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::IncludeContent => Some("return-content"),
            Self::NoContent => Some("return-no-content"),
        }
    }
}

/// Settings for one client context.
///
/// Loadable from JSON with camelCase field names; every field except
/// `baseUri` has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Service root. Entity set and `$batch` URIs are resolved against it.
    pub base_uri: String,
    /// Highest protocol version sent or accepted.
    pub max_protocol_version: ProtocolVersion,
    /// Payload format.
    pub format: ODataFormat,
    /// How query results are merged into tracked state.
    pub merge_option: MergeOption,
    /// Response preference for inserts and updates.
    pub add_and_update_response_preference: ResponsePreference,
    /// Send PUT, MERGE, PATCH and DELETE as POST with `X-HTTP-Method`.
    pub use_post_tunneling: bool,
}

impl ClientSettings {
    /// Creates settings for a service root with every other field at its
    /// default.
    pub fn new(base_uri: impl Into<String>) -> Self {
        Self {
            base_uri: base_uri.into(),
            max_protocol_version: ProtocolVersion::V3,
            format: ODataFormat::Atom,
            merge_option: MergeOption::AppendOnly,
            add_and_update_response_preference: ResponsePreference::None,
            use_post_tunneling: false,
        }
    }

    /// Parses settings from a JSON document.
    pub fn from_json(json: &str) -> ClientResult<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| ClientError::invalid_settings(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Sets the protocol ceiling.
    pub fn with_max_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.max_protocol_version = version;
        self
    }

    /// Sets the payload format.
    pub fn with_format(mut self, format: ODataFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the merge option.
    pub fn with_merge_option(mut self, merge_option: MergeOption) -> Self {
        self.merge_option = merge_option;
        self
    }

    /// Sets the response preference.
    pub fn with_response_preference(mut self, preference: ResponsePreference) -> Self {
        self.add_and_update_response_preference = preference;
        self
    }

    /// Enables POST tunneling.
    pub fn with_post_tunneling(mut self, enabled: bool) -> Self {
        self.use_post_tunneling = enabled;
        self
    }

    /// Checks combinations the protocol ceiling cannot express.
    pub fn validate(&self) -> ClientResult<()> {
        if self.base_uri.is_empty() {
            return Err(ClientError::invalid_settings("baseUri is required"));
        }
        if self.format == ODataFormat::Json && self.max_protocol_version < ProtocolVersion::V3 {
            return Err(ClientError::invalid_settings(format!(
                "JSON format requires protocol version 3.0, ceiling is {}",
                self.max_protocol_version
            )));
        }
        if self.add_and_update_response_preference != ResponsePreference::None
            && self.max_protocol_version < ProtocolVersion::V3
        {
            return Err(ClientError::invalid_settings(format!(
                "response preferences require protocol version 3.0, ceiling is {}",
                self.max_protocol_version
            )));
        }
        Ok(())
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::new("")
    }
}
