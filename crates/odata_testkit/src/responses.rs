//! Canned responses for scripted transports.

use crate::serializer::WireEntry;
use http::StatusCode;
use odata_protocol::{media_types, names, ResponseMessage};
use std::fmt::Write as _;

/// `201 Created` with `Location` and `ETag` headers and no body.
pub fn created(location: &str) -> ResponseMessage {
    ResponseMessage::new(StatusCode::CREATED)
        .with_header(names::DATA_SERVICE_VERSION, "1.0;")
        .with_header(names::LOCATION, location)
        .with_header(names::ETAG, "W/\"1\"")
}

/// `201 Created` carrying `entry` as a JSON body.
pub fn created_entry(entry: &WireEntry) -> ResponseMessage {
    let body = serde_json::to_vec(entry).expect("Failed to serialize entry");
    let mut response = ResponseMessage::new(StatusCode::CREATED)
        .with_header(names::DATA_SERVICE_VERSION, "1.0;")
        .with_header(names::CONTENT_TYPE, "application/json")
        .with_body(body);
    if let Some(id) = &entry.id {
        response = response.with_header(names::LOCATION, id.clone());
    }
    response
}

/// `204 No Content`.
pub fn no_content() -> ResponseMessage {
    ResponseMessage::new(StatusCode::NO_CONTENT).with_header(names::DATA_SERVICE_VERSION, "1.0;")
}

/// `204 No Content` with a new `ETag`.
pub fn no_content_with_etag(etag: &str) -> ResponseMessage {
    no_content().with_header(names::ETAG, etag)
}

/// An error response with a plain-text message.
pub fn error_response(status: StatusCode, message: &str) -> ResponseMessage {
    ResponseMessage::new(status)
        .with_header(names::CONTENT_TYPE, media_types::TEXT_PLAIN)
        .with_body(message.to_string())
}

enum BatchItem {
    Operation(ResponseMessage),
    ChangeSet(Vec<ResponseMessage>),
}

/// Builds `multipart/mixed` batch response bodies.
///
/// ```rust,ignore
/// let response = BatchResponseBuilder::new()
///     .changeset(vec![created("http://host/svc/Customers(1)"), no_content()])
///     .build();
/// ```
pub struct BatchResponseBuilder {
    boundary: String,
    items: Vec<BatchItem>,
    version: Option<String>,
}

impl Default for BatchResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchResponseBuilder {
    /// Creates an empty batch response.
    pub fn new() -> Self {
        Self {
            boundary: "batchresponse_1".to_string(),
            items: Vec::new(),
            version: Some("1.0;".to_string()),
        }
    }

    /// Sets the envelope `DataServiceVersion`, or removes it.
    pub fn version(mut self, version: Option<&str>) -> Self {
        self.version = version.map(str::to_string);
        self
    }

    /// Adds a top-level operation response.
    pub fn operation(mut self, response: ResponseMessage) -> Self {
        self.items.push(BatchItem::Operation(response));
        self
    }

    /// Adds a changeset response.
    pub fn changeset(mut self, responses: Vec<ResponseMessage>) -> Self {
        self.items.push(BatchItem::ChangeSet(responses));
        self
    }

    /// Builds a `202 Accepted` envelope.
    pub fn build(self) -> ResponseMessage {
        let mut body = String::new();
        for (index, item) in self.items.iter().enumerate() {
            let _ = write!(body, "--{}\r\n", self.boundary);
            match item {
                BatchItem::Operation(response) => write_http(&mut body, response),
                BatchItem::ChangeSet(responses) => {
                    let changeset = format!("changesetresponse_{}", index + 1);
                    let _ = write!(
                        body,
                        "{}: {}; boundary={changeset}\r\n\r\n",
                        names::CONTENT_TYPE,
                        media_types::MULTIPART_MIXED
                    );
                    for response in responses {
                        let _ = write!(body, "--{changeset}\r\n");
                        write_http(&mut body, response);
                    }
                    let _ = write!(body, "--{changeset}--\r\n");
                }
            }
        }
        let _ = write!(body, "--{}--\r\n", self.boundary);

        let mut response = ResponseMessage::new(StatusCode::ACCEPTED)
            .with_header(
                names::CONTENT_TYPE,
                format!("{}; boundary={}", media_types::MULTIPART_MIXED, self.boundary),
            )
            .with_body(body);
        if let Some(version) = self.version {
            response = response.with_header(names::DATA_SERVICE_VERSION, version);
        }
        response
    }
}

fn write_http(body: &mut String, response: &ResponseMessage) {
    let _ = write!(
        body,
        "{}: {}\r\nContent-Transfer-Encoding: binary\r\n\r\n",
        names::CONTENT_TYPE,
        media_types::APPLICATION_HTTP
    );
    let _ = write!(
        body,
        "HTTP/1.1 {} {}\r\n",
        response.status.as_u16(),
        response.status.canonical_reason().unwrap_or("")
    );
    for (name, value) in response.headers.iter() {
        let _ = write!(body, "{name}: {value}\r\n");
    }
    let _ = write!(body, "\r\n{}\r\n", String::from_utf8_lossy(&response.body));
}
