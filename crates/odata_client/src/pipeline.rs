//! The request pipeline.
//!
//! Every request goes through the same steps:
//!
//! 1. default headers and the request version
//! 2. building-request handlers rewrite method, URI and headers
//! 3. the request message is constructed from the rewritten values
//! 4. sending-request handlers inspect or replace the message
//! 5. `Content-Length` is computed from the final body
//! 6. the transport sends it
//! 7. receiving-response handlers observe the outcome, even a failure
//!
//! Batch parts run steps 1 to 4 only; the envelope carrying them runs
//! all seven.

use crate::error::ClientResult;
use crate::events::{BuildingRequestArgs, ClientEvents, ReceivingResponseArgs, SendingRequestArgs};
use crate::transport::{AsyncTransport, Transport, TransportFailure};
use bytes::Bytes;
use http::Method;
use odata_protocol::{
    merge_method, names, BatchWriter, FormatNegotiator, HeaderCollection, PayloadKind,
    RequestMessage, RequestShape, ResponseMessage,
};
use odata_tracking::DescriptorKey;
use tracing::{debug, trace};

/// Where the `Content-Type` of a request body comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestContent {
    /// No body.
    None,
    /// A payload whose media type is negotiated.
    Payload(PayloadKind),
    /// A body with a caller-provided media type, e.g. a stream.
    Raw(String),
}

/// Everything needed to build one request.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// HTTP method.
    pub method: Method,
    /// Absolute URI or `$<Content-ID>` reference.
    pub uri: String,
    /// Payload kind of the expected response.
    pub accept: PayloadKind,
    /// Versioned features of the request.
    pub shape: RequestShape,
    /// Extra headers such as `If-Match` or `Slug`.
    pub headers: HeaderCollection,
    /// Body media type source.
    pub content: RequestContent,
    /// Body.
    pub body: Bytes,
    /// Descriptor the request is for.
    pub descriptor: Option<DescriptorKey>,
}

impl RequestSpec {
    /// Creates a body-less request expecting `accept`.
    pub fn new(method: Method, uri: impl Into<String>, accept: PayloadKind) -> Self {
        Self {
            method,
            uri: uri.into(),
            accept,
            shape: RequestShape::new(),
            headers: HeaderCollection::new(),
            content: RequestContent::None,
            body: Bytes::new(),
            descriptor: None,
        }
    }

    /// Sets the request shape.
    pub fn with_shape(mut self, shape: RequestShape) -> Self {
        self.shape = shape;
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets a payload body with a negotiated media type.
    pub fn with_payload(mut self, kind: PayloadKind, body: impl Into<Bytes>) -> Self {
        self.content = RequestContent::Payload(kind);
        self.body = body.into();
        self
    }

    /// Sets a body with an explicit media type.
    pub fn with_raw_body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content = RequestContent::Raw(content_type.into());
        self.body = body.into();
        self
    }

    /// Associates the request with a descriptor.
    pub fn for_descriptor(mut self, key: DescriptorKey) -> Self {
        self.descriptor = Some(key);
        self
    }
}

/// Builds, sends and observes requests for one client.
#[derive(Debug, Clone)]
pub struct RequestPipeline {
    negotiator: FormatNegotiator,
    post_tunneling: bool,
    events: ClientEvents,
}

impl RequestPipeline {
    /// Creates a pipeline with no event handlers.
    pub fn new(negotiator: FormatNegotiator, post_tunneling: bool) -> Self {
        Self {
            negotiator,
            post_tunneling,
            events: ClientEvents::new(),
        }
    }

    /// The format negotiator.
    #[must_use]
    pub fn negotiator(&self) -> &FormatNegotiator {
        &self.negotiator
    }

    /// Replaces the format negotiator, e.g. after loading a service model.
    pub fn set_negotiator(&mut self, negotiator: FormatNegotiator) {
        self.negotiator = negotiator;
    }

    /// Registered event handlers.
    #[must_use]
    pub fn events(&self) -> &ClientEvents {
        &self.events
    }

    /// Mutable access for handler registration.
    pub fn events_mut(&mut self) -> &mut ClientEvents {
        &mut self.events
    }

    fn tunnels(method: &Method) -> bool {
        *method == Method::PUT
            || *method == Method::PATCH
            || *method == Method::DELETE
            || *method == merge_method()
    }

    /// Runs steps 1 to 5 for a top-level request.
    pub fn build(&self, spec: RequestSpec) -> ClientResult<RequestMessage> {
        let mut request = self.construct(spec, false)?;
        if !request.body.is_empty() || request.method != Method::GET {
            let length = request.body.len().to_string();
            request.headers.set(names::CONTENT_LENGTH, length);
        }
        Ok(request)
    }

    /// Runs steps 1 to 4 for a part of a batch request.
    pub fn build_batch_part(&self, spec: RequestSpec) -> ClientResult<RequestMessage> {
        self.construct(spec, true)
    }

    /// Builds the envelope of a finished batch.
    pub fn build_batch(
        &self,
        batch_uri: impl Into<String>,
        writer: BatchWriter,
        shape: RequestShape,
    ) -> ClientResult<RequestMessage> {
        let content_type = writer.content_type();
        let parts = writer.part_count();
        let body = writer.finish()?;
        trace!(parts, bytes = body.len(), "batch body buffered");
        let spec = RequestSpec::new(Method::POST, batch_uri, PayloadKind::Batch)
            .with_shape(shape)
            .with_raw_body(content_type, body);
        self.build(spec)
    }

    fn construct(&self, spec: RequestSpec, is_batch_part: bool) -> ClientResult<RequestMessage> {
        let ceiling = self.negotiator.ceiling();
        let mut shape = spec.shape;
        if spec.method == Method::PATCH {
            shape.patch = true;
        }
        if spec.headers.contains(names::PREFER) {
            shape.prefer = true;
        }
        let content_kind = match &spec.content {
            RequestContent::Payload(kind) => Some(*kind),
            _ => None,
        };
        if self.negotiator.uses_json_light(spec.accept)
            || content_kind.is_some_and(|k| self.negotiator.uses_json_light(k))
        {
            shape.json_light = true;
        }

        let mut headers = HeaderCollection::new();
        let version = headers.set_request_version(shape.required_version(), ceiling)?;
        headers.set(names::ACCEPT, self.negotiator.accept(spec.accept, shape.select)?);
        headers.set(names::ACCEPT_CHARSET, "UTF-8");
        match &spec.content {
            RequestContent::None => {}
            RequestContent::Payload(kind) => {
                headers.set(names::CONTENT_TYPE, self.negotiator.content_type(*kind)?);
            }
            RequestContent::Raw(content_type) => {
                headers.set(names::CONTENT_TYPE, content_type.clone());
            }
        }
        for (name, value) in spec.headers.iter() {
            headers.set(name, value);
        }

        let mut args = BuildingRequestArgs::new(spec.method, spec.uri, headers, spec.descriptor);
        self.events.fire_building(&mut args);
        let BuildingRequestArgs {
            method,
            uri,
            mut headers,
            descriptor,
        } = args;
        // Handlers may raise the version up to the ceiling but never lower it.
        if let Some(requested) = headers.data_service_version()? {
            requested.ensure_within(ceiling)?;
        }
        let version = headers.set_request_version(version, ceiling)?;

        let mut request = RequestMessage::new(method, uri).with_body(spec.body);
        request.headers = headers;
        if self.post_tunneling && !is_batch_part && Self::tunnels(&request.method) {
            request
                .headers
                .set(names::X_HTTP_METHOD, request.method.as_str().to_string());
            request.method = Method::POST;
        }

        let mut sending = SendingRequestArgs::new(request, descriptor, is_batch_part);
        self.events.fire_sending(&mut sending);
        let request = sending.request;

        debug!(
            method = %request.method,
            uri = %request.uri,
            %version,
            batch_part = is_batch_part,
            "request built"
        );
        Ok(request)
    }

    fn observe(
        &self,
        result: &Result<ResponseMessage, TransportFailure>,
        descriptor: Option<&DescriptorKey>,
    ) {
        let response = match result {
            Ok(response) => {
                debug!(status = %response.status, "response received");
                Some(response)
            }
            Err(failure) => {
                debug!(error = %failure, "transport failure");
                failure.response.as_ref()
            }
        };
        self.events.fire_receiving(&ReceivingResponseArgs {
            response,
            descriptor,
            is_batch_part: false,
        });
    }

    /// Fires the receiving-response event for one part of a batch response.
    pub(crate) fn observe_part(
        &self,
        response: Option<&ResponseMessage>,
        descriptor: Option<&DescriptorKey>,
    ) {
        self.events.fire_receiving(&ReceivingResponseArgs {
            response,
            descriptor,
            is_batch_part: true,
        });
    }

    /// Runs steps 6 and 7 with a blocking transport.
    pub fn send<T: Transport + ?Sized>(
        &self,
        transport: &T,
        request: RequestMessage,
        descriptor: Option<&DescriptorKey>,
    ) -> Result<ResponseMessage, TransportFailure> {
        let result = transport.send(request);
        self.observe(&result, descriptor);
        result
    }

    /// Runs steps 6 and 7 with an asynchronous transport.
    pub async fn send_async<T: AsyncTransport>(
        &self,
        transport: &T,
        request: RequestMessage,
        descriptor: Option<&DescriptorKey>,
    ) -> Result<ResponseMessage, TransportFailure> {
        let result = transport.send_async(request).await;
        self.observe(&result, descriptor);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;
    use crate::transport::MockTransport;
    use http::StatusCode;
    use odata_protocol::{media_types, ODataFormat, ProtocolError, ProtocolVersion};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn pipeline(ceiling: ProtocolVersion) -> RequestPipeline {
        RequestPipeline::new(
            FormatNegotiator::new(ODataFormat::Atom, ceiling).unwrap(),
            false,
        )
    }

    #[test]
    fn default_headers() {
        let p = pipeline(ProtocolVersion::V3);
        let request = p
            .build(
                RequestSpec::new(Method::POST, "http://h/Customers", PayloadKind::Entry)
                    .with_payload(PayloadKind::Entry, "<entry/>"),
            )
            .unwrap();
        assert_eq!(request.header(names::DATA_SERVICE_VERSION), Some("1.0;NetFx"));
        assert_eq!(request.header(names::MAX_DATA_SERVICE_VERSION), Some("3.0;NetFx"));
        assert_eq!(request.header(names::ACCEPT), Some(media_types::ATOM_ACCEPT));
        assert_eq!(request.header(names::ACCEPT_CHARSET), Some("UTF-8"));
        assert_eq!(request.header(names::CONTENT_TYPE), Some(media_types::ATOM));
        assert_eq!(request.header(names::CONTENT_LENGTH), Some("8"));
    }

    #[test]
    fn version_above_ceiling_fails_before_events() {
        let mut p = pipeline(ProtocolVersion::V1);
        let fired = Arc::new(Mutex::new(false));
        let f = fired.clone();
        p.events_mut().on_building_request(move |_| *f.lock() = true);

        let err = p
            .build(
                RequestSpec::new(Method::GET, "http://h/Photos(1)/Thumb", PayloadKind::Stream)
                    .with_shape(RequestShape::new().with_named_stream()),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::VersionExceedsCeiling { .. })
        ));
        assert!(!*fired.lock());
    }

    #[test]
    fn patch_and_prefer_raise_version() {
        let p = pipeline(ProtocolVersion::V3);
        let request = p
            .build(RequestSpec::new(Method::PATCH, "http://h/A(1)", PayloadKind::Entry))
            .unwrap();
        assert_eq!(request.header(names::DATA_SERVICE_VERSION), Some("3.0;NetFx"));

        let p = pipeline(ProtocolVersion::V2);
        let err = p
            .build(
                RequestSpec::new(Method::POST, "http://h/A", PayloadKind::Entry)
                    .with_header(names::PREFER, "return-content"),
            )
            .unwrap_err();
        assert!(err.is_local());
    }

    #[test]
    fn building_rewrite_is_used_for_construction() {
        let mut p = pipeline(ProtocolVersion::V3);
        p.events_mut().on_building_request(|args| {
            args.uri = "http://h/Other".into();
            args.headers.set("X-Trace", "1");
        });
        let request = p
            .build(RequestSpec::new(Method::GET, "http://h/A", PayloadKind::Feed))
            .unwrap();
        assert_eq!(request.uri, "http://h/Other");
        assert_eq!(request.header("x-trace"), Some("1"));
        assert_eq!(request.header(names::CONTENT_LENGTH), None);
    }

    #[test]
    fn building_handler_cannot_lower_version() {
        let mut p = pipeline(ProtocolVersion::V3);
        p.events_mut()
            .on_building_request(|args| args.headers.set(names::DATA_SERVICE_VERSION, "1.0"));
        let request = p
            .build(RequestSpec::new(Method::PATCH, "http://h/A(1)", PayloadKind::Entry))
            .unwrap();
        assert_eq!(request.header(names::DATA_SERVICE_VERSION), Some("3.0;NetFx"));
        assert_eq!(request.header(names::MAX_DATA_SERVICE_VERSION), Some("3.0;NetFx"));
    }

    #[test]
    fn building_handler_may_raise_version_within_ceiling() {
        let mut p = pipeline(ProtocolVersion::V3);
        p.events_mut()
            .on_building_request(|args| args.headers.set(names::DATA_SERVICE_VERSION, "2.0"));
        let request = p
            .build(RequestSpec::new(Method::GET, "http://h/A", PayloadKind::Feed))
            .unwrap();
        assert_eq!(request.header(names::DATA_SERVICE_VERSION), Some("2.0;NetFx"));
    }

    #[test]
    fn building_handler_cannot_exceed_ceiling() {
        let mut p = pipeline(ProtocolVersion::V1);
        p.events_mut()
            .on_building_request(|args| args.headers.set(names::DATA_SERVICE_VERSION, "3.0"));
        let err = p
            .build(RequestSpec::new(Method::GET, "http://h/A", PayloadKind::Feed))
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::VersionExceedsCeiling { .. })
        ));
    }

    #[test]
    fn content_length_follows_replaced_body() {
        let mut p = pipeline(ProtocolVersion::V3);
        p.events_mut()
            .on_sending_request2(|args| args.request.body = Bytes::from_static(b"0123456789"))
            .unwrap();
        let request = p
            .build(
                RequestSpec::new(Method::PUT, "http://h/A(1)", PayloadKind::Entry)
                    .with_payload(PayloadKind::Entry, "x"),
            )
            .unwrap();
        assert_eq!(request.header(names::CONTENT_LENGTH), Some("10"));
    }

    #[test]
    fn post_tunneling() {
        let p = RequestPipeline::new(
            FormatNegotiator::new(ODataFormat::Atom, ProtocolVersion::V3).unwrap(),
            true,
        );
        let request = p
            .build(RequestSpec::new(merge_method(), "http://h/A(1)", PayloadKind::Entry))
            .unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.header(names::X_HTTP_METHOD), Some("MERGE"));

        let get = p
            .build(RequestSpec::new(Method::GET, "http://h/A(1)", PayloadKind::Entry))
            .unwrap();
        assert_eq!(get.method, Method::GET);

        let part = p
            .build_batch_part(RequestSpec::new(Method::DELETE, "http://h/A(1)", PayloadKind::Entry))
            .unwrap();
        assert_eq!(part.method, Method::DELETE);
        assert_eq!(part.header(names::CONTENT_LENGTH), None);
    }

    #[test]
    fn receiving_fires_on_failure() {
        let mut p = pipeline(ProtocolVersion::V3);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        p.events_mut()
            .on_receiving_response(move |args| s.lock().push(args.response.map(|r| r.status)));

        let transport = MockTransport::new();
        transport.push_response(ResponseMessage::new(StatusCode::OK));
        transport.push_failure(TransportFailure::new("reset"));

        let request = p
            .build(RequestSpec::new(Method::GET, "http://h/A", PayloadKind::Feed))
            .unwrap();
        assert!(p.send(&transport, request.clone(), None).is_ok());
        assert!(p.send(&transport, request, None).is_err());
        assert_eq!(*seen.lock(), vec![Some(StatusCode::OK), None]);
    }

    #[tokio::test]
    async fn send_async_observes() {
        let mut p = pipeline(ProtocolVersion::V3);
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        p.events_mut().on_receiving_response(move |_| *c.lock() += 1);

        let transport = MockTransport::new();
        transport.push_response(ResponseMessage::new(StatusCode::NO_CONTENT));
        let request = p
            .build(RequestSpec::new(Method::DELETE, "http://h/A(1)", PayloadKind::Entry))
            .unwrap();
        let response = p.send_async(&transport, request, None).await.unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn batch_envelope() {
        let p = pipeline(ProtocolVersion::V3);
        let mut writer = BatchWriter::with_boundary("batch_1");
        writer
            .write_query(
                &p.build_batch_part(RequestSpec::new(Method::GET, "http://h/A", PayloadKind::Feed))
                    .unwrap(),
            )
            .unwrap();
        let request = p
            .build_batch("http://h/$batch", writer, RequestShape::new())
            .unwrap();
        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.header(names::CONTENT_TYPE),
            Some("multipart/mixed; boundary=batch_1")
        );
        assert_eq!(request.header(names::ACCEPT), Some(media_types::MULTIPART_MIXED));
        assert_eq!(
            request.header(names::CONTENT_LENGTH),
            Some(request.body.len().to_string().as_str())
        );
    }
}
