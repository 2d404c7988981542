//! Stream descriptors.

use bytes::Bytes;

/// A pending stream payload to upload on the next save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveStream {
    /// Media type of the payload.
    pub content_type: String,
    /// Optional `Slug` header value for media resource creation.
    pub slug: Option<String>,
    /// Buffered payload.
    pub body: Bytes,
}

impl SaveStream {
    /// Creates a stream payload.
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            slug: None,
            body: body.into(),
        }
    }

    /// Sets the slug.
    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = Some(slug.into());
        self
    }
}

/// State of a named stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No pending upload.
    Unchanged,
    /// A new payload is pending.
    Modified,
}

/// A named stream of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub(crate) name: String,
    pub(crate) self_link: Option<String>,
    pub(crate) edit_link: Option<String>,
    pub(crate) content_type: Option<String>,
    pub(crate) etag: Option<String>,
    pub(crate) state: StreamState,
    pub(crate) save_stream: Option<SaveStream>,
}

impl StreamDescriptor {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            self_link: None,
            edit_link: None,
            content_type: None,
            etag: None,
            state: StreamState::Unchanged,
            save_stream: None,
        }
    }

    /// Stream name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read link of the stream.
    #[must_use]
    pub fn self_link(&self) -> Option<&str> {
        self.self_link.as_deref()
    }

    /// Edit link of the stream.
    #[must_use]
    pub fn edit_link(&self) -> Option<&str> {
        self.edit_link.as_deref()
    }

    /// Content type reported by the server.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// ETag of the stream.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Pending upload, if any.
    #[must_use]
    pub fn save_stream(&self) -> Option<&SaveStream> {
        self.save_stream.as_ref()
    }
}
