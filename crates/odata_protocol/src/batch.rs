//! Multipart batch framing.
//!
//! A batch is one `multipart/mixed` request. Queries are top-level parts;
//! changes live inside `multipart/mixed` changesets and carry a
//! `Content-ID` so later parts can reference entities created earlier in
//! the same changeset as `$<id>`.
//!
//! Parts are buffered: the outer body is only complete after
//! [`BatchWriter::finish`], which is when its length becomes known.

use crate::error::{ProtocolError, ProtocolResult};
use crate::format::media_types;
use crate::headers::{names, HeaderCollection};
use crate::message::{RequestMessage, ResponseMessage};
use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::trace;
use uuid::Uuid;

const CRLF: &[u8] = b"\r\n";

struct ChangesetBuffer {
    boundary: String,
    buffer: Vec<u8>,
}

/// Writes a batch request body.
pub struct BatchWriter {
    boundary: String,
    buffer: Vec<u8>,
    changeset: Option<ChangesetBuffer>,
    parts: usize,
}

impl Default for BatchWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchWriter {
    /// Creates a writer with a fresh `batch_<uuid>` boundary.
    pub fn new() -> Self {
        Self::with_boundary(format!("batch_{}", Uuid::new_v4()))
    }

    /// Creates a writer with an explicit boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buffer: Vec::new(),
            changeset: None,
            parts: 0,
        }
    }

    /// The batch boundary.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` of the batch request.
    #[must_use]
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", media_types::MULTIPART_MIXED, self.boundary)
    }

    /// Number of operations written so far.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.parts
    }

    /// Returns true while a changeset is open.
    #[must_use]
    pub fn in_changeset(&self) -> bool {
        self.changeset.is_some()
    }

    fn open_part(buffer: &mut Vec<u8>, boundary: &str) {
        if !buffer.is_empty() {
            buffer.extend_from_slice(CRLF);
        }
        buffer.extend_from_slice(b"--");
        buffer.extend_from_slice(boundary.as_bytes());
        buffer.extend_from_slice(CRLF);
    }

    fn write_header(buffer: &mut Vec<u8>, name: &str, value: &str) {
        buffer.extend_from_slice(name.as_bytes());
        buffer.extend_from_slice(b": ");
        buffer.extend_from_slice(value.as_bytes());
        buffer.extend_from_slice(CRLF);
    }

    fn write_operation(buffer: &mut Vec<u8>, content_id: Option<u32>, request: &RequestMessage) {
        Self::write_header(buffer, names::CONTENT_TYPE, media_types::APPLICATION_HTTP);
        Self::write_header(buffer, "Content-Transfer-Encoding", "binary");
        if let Some(id) = content_id {
            Self::write_header(buffer, names::CONTENT_ID, &id.to_string());
        }
        buffer.extend_from_slice(CRLF);

        buffer.extend_from_slice(format!("{} {} HTTP/1.1", request.method, request.uri).as_bytes());
        buffer.extend_from_slice(CRLF);
        for (name, value) in request.headers.iter() {
            Self::write_header(buffer, name, value);
        }
        buffer.extend_from_slice(CRLF);
        buffer.extend_from_slice(&request.body);
    }

    /// Writes a top-level query operation.
    pub fn write_query(&mut self, request: &RequestMessage) -> ProtocolResult<()> {
        if self.changeset.is_some() {
            return Err(ProtocolError::invalid_batch(
                "queries cannot be written inside a changeset",
            ));
        }
        if request.method != Method::GET {
            return Err(ProtocolError::invalid_batch(format!(
                "only GET is allowed outside a changeset, got {}",
                request.method
            )));
        }
        Self::open_part(&mut self.buffer, &self.boundary);
        Self::write_operation(&mut self.buffer, None, request);
        self.parts += 1;
        Ok(())
    }

    /// Opens a changeset with a fresh `changeset_<uuid>` boundary.
    pub fn begin_changeset(&mut self) -> ProtocolResult<()> {
        if self.changeset.is_some() {
            return Err(ProtocolError::invalid_batch("changesets cannot be nested"));
        }
        self.changeset = Some(ChangesetBuffer {
            boundary: format!("changeset_{}", Uuid::new_v4()),
            buffer: Vec::new(),
        });
        Ok(())
    }

    /// Writes a change operation into the open changeset.
    pub fn write_change(&mut self, content_id: u32, request: &RequestMessage) -> ProtocolResult<()> {
        let Some(changeset) = self.changeset.as_mut() else {
            return Err(ProtocolError::invalid_batch(
                "change operations must be written inside a changeset",
            ));
        };
        if request.method == Method::GET {
            return Err(ProtocolError::invalid_batch("GET is not allowed inside a changeset"));
        }
        Self::open_part(&mut changeset.buffer, &changeset.boundary);
        Self::write_operation(&mut changeset.buffer, Some(content_id), request);
        self.parts += 1;
        trace!(content_id, method = %request.method, "batch change written");
        Ok(())
    }

    /// Closes the open changeset.
    pub fn end_changeset(&mut self) -> ProtocolResult<()> {
        let Some(mut changeset) = self.changeset.take() else {
            return Err(ProtocolError::invalid_batch("no changeset is open"));
        };
        changeset.buffer.extend_from_slice(CRLF);
        changeset.buffer.extend_from_slice(b"--");
        changeset.buffer.extend_from_slice(changeset.boundary.as_bytes());
        changeset.buffer.extend_from_slice(b"--");
        changeset.buffer.extend_from_slice(CRLF);

        Self::open_part(&mut self.buffer, &self.boundary);
        Self::write_header(
            &mut self.buffer,
            names::CONTENT_TYPE,
            &format!("{}; boundary={}", media_types::MULTIPART_MIXED, changeset.boundary),
        );
        self.buffer.extend_from_slice(CRLF);
        self.buffer.extend_from_slice(&changeset.buffer);
        Ok(())
    }

    /// Closes the batch and returns the complete body.
    pub fn finish(mut self) -> ProtocolResult<Bytes> {
        if self.changeset.is_some() {
            return Err(ProtocolError::invalid_batch("a changeset is still open"));
        }
        self.buffer.extend_from_slice(CRLF);
        self.buffer.extend_from_slice(b"--");
        self.buffer.extend_from_slice(self.boundary.as_bytes());
        self.buffer.extend_from_slice(b"--");
        self.buffer.extend_from_slice(CRLF);
        Ok(Bytes::from(self.buffer))
    }
}

/// One top-level part of a batch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItemResponse {
    /// A query response, or the single error response of a failed changeset.
    Operation(ResponseMessage),
    /// Responses of a changeset, in request order.
    ChangeSet(Vec<ResponseMessage>),
}

/// Reads batch response bodies.
pub struct BatchReader;

impl BatchReader {
    /// Splits a batch response into its parts.
    pub fn read_response(response: &ResponseMessage) -> ProtocolResult<Vec<BatchItemResponse>> {
        let content_type = response
            .header(names::CONTENT_TYPE)
            .ok_or_else(|| ProtocolError::invalid_batch("batch response has no Content-Type"))?;
        Self::read(content_type, &response.body)
    }

    /// Splits a `multipart/mixed` body with the given content type.
    pub fn read(content_type: &str, body: &[u8]) -> ProtocolResult<Vec<BatchItemResponse>> {
        let boundary = boundary_of(content_type)?;
        split_parts(body, &boundary)?
            .into_iter()
            .map(read_item)
            .collect()
    }
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with(media_types::MULTIPART_MIXED)
}

fn boundary_of(content_type: &str) -> ProtocolResult<String> {
    if !is_multipart(content_type) {
        return Err(ProtocolError::invalid_batch(format!(
            "expected multipart/mixed, got {content_type}"
        )));
    }
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ProtocolError::invalid_batch("multipart content type has no boundary"))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn after_line(body: &[u8], from: usize) -> usize {
    body[from..]
        .iter()
        .position(|b| *b == b'\n')
        .map_or(body.len(), |p| from + p + 1)
}

fn trim_line_break(body: &[u8], start: usize, end: usize) -> usize {
    if end >= start + 2 && &body[end - 2..end] == CRLF {
        end - 2
    } else if end > start && body[end - 1] == b'\n' {
        end - 1
    } else {
        end
    }
}

fn split_parts<'a>(body: &'a [u8], boundary: &str) -> ProtocolResult<Vec<&'a [u8]>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut positions = Vec::new();
    let mut closed = false;
    let mut from = 0;
    while let Some(pos) = find(&body[from..], delimiter) {
        let at = from + pos;
        from = at + delimiter.len();
        if at != 0 && body[at - 1] != b'\n' {
            continue;
        }
        positions.push(at);
        if body[from..].starts_with(b"--") {
            closed = true;
            break;
        }
    }
    if !closed {
        return Err(ProtocolError::invalid_batch(format!(
            "missing closing delimiter for boundary {boundary}"
        )));
    }

    Ok(positions
        .windows(2)
        .map(|pair| {
            let start = after_line(body, pair[0] + delimiter.len());
            let end = trim_line_break(body, start, pair[1]);
            &body[start..end]
        })
        .collect())
}

fn split_head(part: &[u8]) -> (&[u8], &[u8]) {
    let crlf = find(part, b"\r\n\r\n").map(|p| (p, 4));
    let lf = find(part, b"\n\n").map(|p| (p, 2));
    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match split {
        Some((at, len)) => (&part[..at], &part[at + len..]),
        None => (part, &part[..0]),
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> ProtocolResult<HeaderCollection> {
    let mut headers = HeaderCollection::new();
    for line in lines.filter(|l| !l.trim().is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProtocolError::invalid_batch(format!("malformed header line {line:?}")))?;
        headers.set(name.trim(), value.trim());
    }
    Ok(headers)
}

fn utf8(bytes: &[u8]) -> ProtocolResult<&str> {
    std::str::from_utf8(bytes).map_err(|_| ProtocolError::invalid_batch("part headers are not UTF-8"))
}

fn read_item(part: &[u8]) -> ProtocolResult<BatchItemResponse> {
    let (head, content) = split_head(part);
    let headers = parse_headers(utf8(head)?.lines())?;
    let content_type = headers
        .get(names::CONTENT_TYPE)
        .ok_or_else(|| ProtocolError::invalid_batch("batch part has no Content-Type"))?;

    if is_multipart(content_type) {
        let boundary = boundary_of(content_type)?;
        let responses = split_parts(content, &boundary)?
            .into_iter()
            .map(|p| {
                let (_, message) = split_head(p);
                read_http_response(message)
            })
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(BatchItemResponse::ChangeSet(responses))
    } else {
        Ok(BatchItemResponse::Operation(read_http_response(content)?))
    }
}

fn read_http_response(message: &[u8]) -> ProtocolResult<ResponseMessage> {
    let (head, body) = split_head(message);
    let head = utf8(head)?;
    let mut lines = head.lines();
    let status_line = lines
        .next()
        .ok_or_else(|| ProtocolError::invalid_batch("empty response part"))?;

    let mut fields = status_line.split_whitespace();
    if !fields.next().is_some_and(|p| p.starts_with("HTTP/")) {
        return Err(ProtocolError::invalid_batch(format!(
            "malformed status line {status_line:?}"
        )));
    }
    let status = fields
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| ProtocolError::invalid_batch(format!("malformed status line {status_line:?}")))?;

    Ok(ResponseMessage {
        status,
        headers: parse_headers(lines)?,
        body: Bytes::copy_from_slice(body),
    })
}
