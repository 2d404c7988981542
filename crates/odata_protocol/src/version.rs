//! Protocol versions and request version computation.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An OData protocol version.
///
/// Ordered: `V1 < V2 < V3`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum ProtocolVersion {
    /// Version 1.0.
    V1,
    /// Version 2.0: paging, inline count, projections.
    V2,
    /// Version 3.0: named streams, PATCH, `Prefer`, JSON light.
    #[default]
    V3,
}

impl ProtocolVersion {
    /// All versions in ascending order.
    pub const ALL: [ProtocolVersion; 3] = [Self::V1, Self::V2, Self::V3];

    /// The bare version number, e.g. `"2.0"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "1.0",
            Self::V2 => "2.0",
            Self::V3 => "3.0",
        }
    }

    /// The value sent in `DataServiceVersion` headers, e.g. `"2.0;NetFx"`.
    #[must_use]
    pub fn header_value(self) -> String {
        format!("{};NetFx", self.as_str())
    }

    /// Parses a version header value.
    ///
    /// Accepts `"2.0"`, `"2"` and an optional `;`-suffixed agent token.
    pub fn parse(value: &str) -> ProtocolResult<Self> {
        let number = value.split(';').next().unwrap_or_default().trim();
        let mut parts = number.split('.');
        let major = parts.next().and_then(|m| m.parse::<u32>().ok());
        let minor_ok = parts.all(|p| p.parse::<u32>().map(|n| n == 0).unwrap_or(false));

        match (major, minor_ok) {
            (Some(1), true) => Ok(Self::V1),
            (Some(2), true) => Ok(Self::V2),
            (Some(3), true) => Ok(Self::V3),
            _ => Err(ProtocolError::invalid_version(value)),
        }
    }

    /// Fails if `self` exceeds `ceiling`.
    pub fn ensure_within(self, ceiling: ProtocolVersion) -> ProtocolResult<()> {
        if self > ceiling {
            return Err(ProtocolError::VersionExceedsCeiling {
                required: self,
                ceiling,
            });
        }
        Ok(())
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolVersion {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Features of an outgoing request that determine its minimum version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestShape {
    /// `$count` segment or `$inlinecount`.
    pub count: bool,
    /// `$select` projection.
    pub select: bool,
    /// Server-driven paging continuation.
    pub continuation: bool,
    /// Named stream access.
    pub named_stream: bool,
    /// `PATCH` method.
    pub patch: bool,
    /// `Prefer` header.
    pub prefer: bool,
    /// JSON light payload.
    pub json_light: bool,
}

impl RequestShape {
    /// A plain request with no versioned feature.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a count request.
    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Marks a projection.
    pub fn with_select(mut self) -> Self {
        self.select = true;
        self
    }

    /// Marks a continuation request.
    pub fn with_continuation(mut self) -> Self {
        self.continuation = true;
        self
    }

    /// Marks named stream access.
    pub fn with_named_stream(mut self) -> Self {
        self.named_stream = true;
        self
    }

    /// Marks a PATCH request.
    pub fn with_patch(mut self) -> Self {
        self.patch = true;
        self
    }

    /// Marks a `Prefer` header.
    pub fn with_prefer(mut self) -> Self {
        self.prefer = true;
        self
    }

    /// Marks a JSON light payload.
    pub fn with_json_light(mut self) -> Self {
        self.json_light = true;
        self
    }

    /// Minimum protocol version this request requires.
    #[must_use]
    pub fn required_version(&self) -> ProtocolVersion {
        if self.named_stream || self.patch || self.prefer || self.json_light {
            ProtocolVersion::V3
        } else if self.count || self.select || self.continuation {
            ProtocolVersion::V2
        } else {
            ProtocolVersion::V1
        }
    }
}
