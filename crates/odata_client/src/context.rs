//! The client context.

use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::events::ClientEvents;
use crate::model_cache::ModelCache;
use crate::pipeline::{RequestPipeline, RequestSpec};
use crate::save::{SaveChangesOptions, SaveEnv, SaveOperation, SaveResult};
use crate::serializer::PayloadSerializer;
use crate::transport::{AsyncTransport, Transport, TransportFailure};
use crate::uri::{entity_uri, value_uri, BaseUriResolver, UriResolver};
use http::Method;
use odata_protocol::{
    FormatNegotiator, PayloadKind, ProtocolVersion, RequestMessage, RequestShape,
    ResponseMessage, ServiceModel,
};
use odata_tracking::{
    ClientModel, EntityDescriptor, EntityRef, EntityState, EntityTracker, EntryMetadata,
    LinkDescriptor, LinkOutcome, SaveStream, TrackingResult,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared cancellation flag of a context.
///
/// Cancellation is cooperative: it is checked before every transport call
/// and never rolls back descriptor state already updated by earlier
/// responses.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation of the running operation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true if cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// What a query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryShape {
    /// Expected payload kind.
    pub payload: PayloadKind,
    /// The URI carries `$select`.
    pub select: bool,
    /// The URI carries `$count` or `$inlinecount`.
    pub count: bool,
    /// The URI is a server-driven paging continuation.
    pub continuation: bool,
}

impl QueryShape {
    /// A plain query for `payload`.
    pub fn new(payload: PayloadKind) -> Self {
        Self {
            payload,
            select: false,
            count: false,
            continuation: false,
        }
    }

    /// Marks a projection.
    pub fn with_select(mut self) -> Self {
        self.select = true;
        self
    }

    /// Marks a count.
    pub fn with_count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Marks a continuation.
    pub fn with_continuation(mut self) -> Self {
        self.continuation = true;
        self
    }

    fn request_shape(self) -> RequestShape {
        RequestShape {
            count: self.count,
            select: self.select,
            continuation: self.continuation,
            ..RequestShape::new()
        }
    }
}

/// Result of a query.
#[derive(Debug, Clone)]
pub enum QueryResponse {
    /// Materialized entities, merged into the tracker per the merge option.
    Entities(Vec<EntityRef>),
    /// Any other payload, unparsed.
    Raw(ResponseMessage),
}

/// A client for one OData service.
///
/// Owns the change tracker and the request pipeline. The transport is
/// shared; event handlers and the cancel handle are per context.
///
/// Every mutation takes `&mut self`: the tracker has a single writer and
/// callers must not mutate tracked state while a save is in progress.
pub struct DataServiceContext<T> {
    settings: ClientSettings,
    tracker: EntityTracker,
    pipeline: RequestPipeline,
    serializer: Arc<dyn PayloadSerializer>,
    resolver: Arc<dyn UriResolver>,
    transport: Arc<T>,
    cancel: CancelHandle,
}

impl<T> DataServiceContext<T> {
    /// Creates a context.
    ///
    /// Fails if the settings are inconsistent or the base URI is invalid.
    pub fn new(
        settings: ClientSettings,
        model: Arc<ClientModel>,
        transport: Arc<T>,
        serializer: Arc<dyn PayloadSerializer>,
    ) -> ClientResult<Self> {
        settings.validate()?;
        let negotiator = FormatNegotiator::new(settings.format, settings.max_protocol_version)?;
        let resolver = Arc::new(BaseUriResolver::new(&settings.base_uri)?);
        info!(
            base_uri = %settings.base_uri,
            ceiling = %settings.max_protocol_version,
            format = ?settings.format,
            "client context created"
        );
        Ok(Self {
            pipeline: RequestPipeline::new(negotiator, settings.use_post_tunneling),
            tracker: EntityTracker::new(model),
            settings,
            serializer,
            resolver,
            transport,
            cancel: CancelHandle::default(),
        })
    }

    /// Creates a context with the cached model of the settings' ceiling.
    pub fn from_cache(
        settings: ClientSettings,
        cache: &ModelCache,
        transport: Arc<T>,
        serializer: Arc<dyn PayloadSerializer>,
    ) -> ClientResult<Self> {
        let model = cache.get(settings.max_protocol_version)?;
        Self::new(settings, model, transport, serializer)
    }

    /// Replaces the URI resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn UriResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Supplies the service model JSON payloads need.
    pub fn with_service_model(mut self, model: Arc<ServiceModel>) -> Self {
        let negotiator = self.pipeline.negotiator().clone().with_service_model(model);
        self.pipeline.set_negotiator(negotiator);
        self
    }

    /// Settings.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// The change tracker.
    pub fn tracker(&self) -> &EntityTracker {
        &self.tracker
    }

    /// The transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Event handlers, for registration.
    pub fn events_mut(&mut self) -> &mut ClientEvents {
        self.pipeline.events_mut()
    }

    /// Handle that cancels the running save or query from anywhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Requests cancellation of the running operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fails with [`ClientError::Cancelled`] after aborting the transport
    /// if cancellation was requested.
    fn abort_if_cancelled(&self, abort: impl FnOnce(&T)) -> ClientResult<()> {
        if self.cancel.is_cancelled() {
            debug!("operation cancelled");
            abort(self.transport.as_ref());
            return Err(ClientError::Cancelled);
        }
        Ok(())
    }

    /// Descriptor of a tracked entity.
    pub fn get_entity_descriptor(&self, entity: &EntityRef) -> Option<&EntityDescriptor> {
        self.tracker.try_get(entity)
    }

    /// Descriptor of a tracked relationship.
    pub fn get_link_descriptor(
        &self,
        source: &EntityRef,
        property: &str,
        target: Option<&EntityRef>,
    ) -> Option<&LinkDescriptor> {
        self.tracker.try_get_link(source, property, target)
    }

    /// Tracked entities in change order.
    pub fn entities(&self) -> Vec<&EntityDescriptor> {
        self.tracker.entities()
    }

    /// Tracked links in change order.
    pub fn links(&self) -> Vec<&LinkDescriptor> {
        self.tracker.links()
    }

    /// Returns true if a save would send anything.
    pub fn has_pending_changes(&self) -> bool {
        self.tracker.has_pending_changes()
    }

    /// Tracks a new entity for insertion into `entity_set`.
    pub fn add_object(&mut self, entity_set: &str, entity: EntityRef) -> ClientResult<()> {
        Ok(self.tracker.add_object(entity_set, entity)?)
    }

    /// Tracks a new entity inserted through a collection navigation
    /// property of `source`.
    pub fn add_related_object(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: EntityRef,
    ) -> ClientResult<()> {
        Ok(self.tracker.add_related_object(source, property, target)?)
    }

    /// Tracks an existing server entity as Unchanged.
    pub fn attach_to(
        &mut self,
        entity_set: &str,
        entity: EntityRef,
        metadata: &EntryMetadata,
    ) -> ClientResult<()> {
        Ok(self.tracker.attach_to(entity_set, entity, metadata)?)
    }

    /// Marks an entity Modified.
    pub fn update_object(&mut self, entity: &EntityRef) -> ClientResult<()> {
        Ok(self.tracker.update_object(entity)?)
    }

    /// Marks an entity Deleted, or stops tracking it if it was never saved.
    pub fn delete_object(&mut self, entity: &EntityRef) -> ClientResult<()> {
        Ok(self.tracker.delete_object(entity)?)
    }

    /// Forces an entity into a state.
    pub fn change_state(&mut self, entity: &EntityRef, state: EntityState) -> ClientResult<()> {
        Ok(self.tracker.change_state(entity, state)?)
    }

    /// Stops tracking an entity and its links.
    ///
    /// Returns false if the entity was not tracked. Fails while an Added
    /// entity created through one of its navigation properties is pending.
    pub fn detach(&mut self, entity: &EntityRef) -> ClientResult<bool> {
        Ok(self.tracker.detach_entity(entity)?)
    }

    /// Tracks a new relationship in a collection property.
    pub fn add_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: &EntityRef,
    ) -> ClientResult<()> {
        Ok(self.tracker.add_link(source, property, target)?)
    }

    /// Tracks an existing relationship as Unchanged.
    pub fn attach_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: &EntityRef,
    ) -> ClientResult<()> {
        Ok(self.tracker.attach_link(source, property, target)?)
    }

    /// Sets or clears a reference property.
    pub fn set_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: Option<&EntityRef>,
    ) -> ClientResult<()> {
        Ok(self.tracker.set_link(source, property, target)?)
    }

    /// Deletes a relationship.
    pub fn delete_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: &EntityRef,
    ) -> ClientResult<LinkOutcome> {
        Ok(self.tracker.delete_link(source, property, target)?)
    }

    /// Stops tracking a relationship.
    pub fn detach_link(
        &mut self,
        source: &EntityRef,
        property: &str,
        target: Option<&EntityRef>,
    ) -> bool {
        self.tracker.detach_link(source, property, target)
    }

    /// Sets the default stream of a media link entry for the next save.
    pub fn set_save_stream(&mut self, entity: &EntityRef, stream: SaveStream) -> ClientResult<()> {
        Ok(self.tracker.set_save_stream(entity, stream)?)
    }

    /// Sets a named stream for the next save.
    pub fn set_named_save_stream(
        &mut self,
        entity: &EntityRef,
        name: &str,
        stream: SaveStream,
    ) -> ClientResult<()> {
        Ok(self.tracker.set_named_save_stream(entity, name, stream)?)
    }

    fn query_request(&self, uri: &str, query: QueryShape) -> ClientResult<RequestMessage> {
        let uri = self.resolver.resolve(uri)?;
        self.pipeline.build(
            RequestSpec::new(Method::GET, uri, query.payload).with_shape(query.request_shape()),
        )
    }

    fn materialize(
        &mut self,
        query: QueryShape,
        outcome: Result<ResponseMessage, TransportFailure>,
    ) -> ClientResult<QueryResponse> {
        let response = checked_response(outcome, self.settings.max_protocol_version)?;
        if !matches!(query.payload, PayloadKind::Entry | PayloadKind::Feed) {
            return Ok(QueryResponse::Raw(response));
        }
        let entries = self
            .serializer
            .read_entries(&response)
            .map_err(ClientError::serialization)?;
        let merge_option = self.settings.merge_option;
        let entities = entries
            .into_iter()
            .map(|entry| self.tracker.merge_materialized(entry, merge_option))
            .collect::<TrackingResult<Vec<_>>>()?;
        debug!(count = entities.len(), ?merge_option, "entries materialized");
        Ok(QueryResponse::Entities(entities))
    }

    fn read_stream_request(&self, entity: &EntityRef, name: Option<&str>) -> ClientResult<RequestMessage> {
        let ceiling = self.settings.max_protocol_version;
        let mut shape = RequestShape::new();
        if name.is_some() {
            shape = shape.with_named_stream();
            shape.required_version().ensure_within(ceiling)?;
        }

        let descriptor = self.tracker.get(entity)?;
        let uri = match name {
            Some(name) => {
                let stream = descriptor.named_stream(name).ok_or_else(|| {
                    ClientError::uri(format!("entity has no named stream {name}"))
                })?;
                let link = stream
                    .self_link()
                    .or_else(|| stream.edit_link())
                    .ok_or_else(|| ClientError::uri(format!("named stream {name} has no link")))?;
                self.resolver.resolve(link)?
            }
            None => match descriptor.read_stream_uri().or(descriptor.edit_stream_uri()) {
                Some(link) => self.resolver.resolve(link)?,
                None => value_uri(&entity_uri(self.resolver.as_ref(), descriptor)?),
            },
        };
        self.pipeline
            .build(RequestSpec::new(Method::GET, uri, PayloadKind::Stream).with_shape(shape))
    }
}

fn checked_response(
    outcome: Result<ResponseMessage, TransportFailure>,
    ceiling: ProtocolVersion,
) -> ClientResult<ResponseMessage> {
    let response = outcome?;
    response.validate_version(ceiling)?;
    if !response.is_success() {
        return Err(ClientError::RequestFailed {
            status: response.status,
            message: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }
    Ok(response)
}

impl<T: Transport> DataServiceContext<T> {
    /// Sends every pending change.
    ///
    /// Local failures (options, versions, tracking) are reported before
    /// anything is sent. Rejected changes are collected in
    /// [`ClientError::SaveFailed`].
    pub fn save_changes(&mut self, options: SaveChangesOptions) -> ClientResult<SaveResult> {
        self.cancel.reset();
        let env = SaveEnv {
            pipeline: &self.pipeline,
            serializer: self.serializer.as_ref(),
            resolver: self.resolver.as_ref(),
            settings: &self.settings,
        };
        let mut operation = SaveOperation::new(&self.tracker, options, &env)?;
        while let Some((request, descriptor)) = operation.next_request(&self.tracker, &env)? {
            self.abort_if_cancelled(Transport::abort)?;
            let outcome = env
                .pipeline
                .send(self.transport.as_ref(), request, descriptor.as_ref());
            operation.handle_response(&mut self.tracker, &env, outcome)?;
        }
        operation.finish()
    }

    /// Sends a query and materializes its result.
    ///
    /// `uri` is built by the caller; relative URIs resolve against the
    /// service root.
    pub fn execute(&mut self, uri: &str, query: QueryShape) -> ClientResult<QueryResponse> {
        self.cancel.reset();
        let request = self.query_request(uri, query)?;
        self.abort_if_cancelled(Transport::abort)?;
        let outcome = self.pipeline.send(self.transport.as_ref(), request, None);
        self.materialize(query, outcome)
    }

    /// Reads the default stream, or a named stream, of a tracked entity.
    pub fn get_read_stream(
        &self,
        entity: &EntityRef,
        name: Option<&str>,
    ) -> ClientResult<ResponseMessage> {
        self.cancel.reset();
        let request = self.read_stream_request(entity, name)?;
        self.abort_if_cancelled(Transport::abort)?;
        let outcome = self.pipeline.send(self.transport.as_ref(), request, None);
        checked_response(outcome, self.settings.max_protocol_version)
    }
}

impl<T: AsyncTransport> DataServiceContext<T> {
    /// Asynchronous [`save_changes`](Self::save_changes).
    pub async fn save_changes_async(
        &mut self,
        options: SaveChangesOptions,
    ) -> ClientResult<SaveResult> {
        self.cancel.reset();
        let env = SaveEnv {
            pipeline: &self.pipeline,
            serializer: self.serializer.as_ref(),
            resolver: self.resolver.as_ref(),
            settings: &self.settings,
        };
        let mut operation = SaveOperation::new(&self.tracker, options, &env)?;
        while let Some((request, descriptor)) = operation.next_request(&self.tracker, &env)? {
            self.abort_if_cancelled(AsyncTransport::abort)?;
            let outcome = env
                .pipeline
                .send_async(self.transport.as_ref(), request, descriptor.as_ref())
                .await;
            operation.handle_response(&mut self.tracker, &env, outcome)?;
        }
        operation.finish()
    }

    /// Asynchronous [`execute`](Self::execute).
    pub async fn execute_async(
        &mut self,
        uri: &str,
        query: QueryShape,
    ) -> ClientResult<QueryResponse> {
        self.cancel.reset();
        let request = self.query_request(uri, query)?;
        self.abort_if_cancelled(AsyncTransport::abort)?;
        let outcome = self
            .pipeline
            .send_async(self.transport.as_ref(), request, None)
            .await;
        self.materialize(query, outcome)
    }

    /// Asynchronous [`get_read_stream`](Self::get_read_stream).
    pub async fn get_read_stream_async(
        &self,
        entity: &EntityRef,
        name: Option<&str>,
    ) -> ClientResult<ResponseMessage> {
        self.cancel.reset();
        let request = self.read_stream_request(entity, name)?;
        self.abort_if_cancelled(AsyncTransport::abort)?;
        let outcome = self
            .pipeline
            .send_async(self.transport.as_ref(), request, None)
            .await;
        checked_response(outcome, self.settings.max_protocol_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{model, Customer, LineSerializer, Photo};
    use crate::transport::MockTransport;
    use http::StatusCode;
    use odata_protocol::{names, ProtocolError};

    const ROOT: &str = "http://host/svc/";

    fn context_with(settings: ClientSettings) -> DataServiceContext<MockTransport> {
        DataServiceContext::new(
            settings,
            model(),
            Arc::new(MockTransport::new()),
            Arc::new(LineSerializer),
        )
        .unwrap()
    }

    fn context() -> DataServiceContext<MockTransport> {
        context_with(ClientSettings::new(ROOT))
    }

    fn created(location: &str) -> ResponseMessage {
        ResponseMessage::new(StatusCode::CREATED)
            .with_header(names::LOCATION, location)
            .with_header(names::ETAG, "W/\"1\"")
    }

    #[test]
    fn rejects_invalid_settings() {
        let result = DataServiceContext::new(
            ClientSettings::new(""),
            model(),
            Arc::new(MockTransport::new()),
            Arc::new(LineSerializer),
        );
        assert!(matches!(result, Err(ClientError::InvalidSettings { .. })));
    }

    #[test]
    fn insert_is_accepted() {
        let mut ctx = context();
        let customer = EntityRef::new(Customer::new("Ann"));
        ctx.add_object("Customers", customer.clone()).unwrap();
        ctx.transport()
            .push_response(created("http://host/svc/Customers('42')"));

        let result = ctx.save_changes(SaveChangesOptions::NONE).unwrap();
        assert!(result.is_success());
        assert_eq!(result.responses.len(), 1);

        let requests = ctx.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::POST);
        assert_eq!(requests[0].uri, "http://host/svc/Customers");
        assert_eq!(&requests[0].body[..], b"type: Customer\nname: Ann\n");

        let descriptor = ctx.get_entity_descriptor(&customer).unwrap();
        assert_eq!(descriptor.state(), EntityState::Unchanged);
        assert_eq!(descriptor.identity(), Some("http://host/svc/Customers('42')"));
        assert_eq!(descriptor.etag(), Some("W/\"1\""));
        assert!(!ctx.has_pending_changes());
    }

    #[test]
    fn update_uses_merge_and_etag() {
        let mut ctx = context();
        let customer = EntityRef::new(Customer::new("Ann"));
        let metadata = EntryMetadata::with_identity("http://host/svc/Customers('1')")
            .edit_link("Customers('1')")
            .etag("W/\"7\"");
        ctx.attach_to("Customers", customer.clone(), &metadata).unwrap();
        ctx.update_object(&customer).unwrap();
        ctx.transport()
            .push_response(ResponseMessage::new(StatusCode::NO_CONTENT).with_header(names::ETAG, "W/\"8\""));

        ctx.save_changes(SaveChangesOptions::NONE).unwrap();
        let request = &ctx.transport().requests()[0];
        assert_eq!(request.method.as_str(), "MERGE");
        assert_eq!(request.uri, "http://host/svc/Customers('1')");
        assert_eq!(request.header(names::IF_MATCH), Some("W/\"7\""));
        assert_eq!(ctx.get_entity_descriptor(&customer).unwrap().etag(), Some("W/\"8\""));
    }

    #[test]
    fn first_failure_stops_the_save() {
        let mut ctx = context();
        ctx.add_object("Customers", EntityRef::new(Customer::new("a"))).unwrap();
        ctx.add_object("Customers", EntityRef::new(Customer::new("b"))).unwrap();
        ctx.transport().push_response(
            ResponseMessage::new(StatusCode::INTERNAL_SERVER_ERROR).with_body("boom"),
        );

        let err = ctx.save_changes(SaveChangesOptions::NONE).unwrap_err();
        let ClientError::SaveFailed(result) = err else {
            panic!("expected SaveFailed, got {err:?}");
        };
        assert_eq!(result.responses.len(), 1);
        assert_eq!(result.responses[0].error.as_deref(), Some("boom"));
        assert_eq!(ctx.transport().request_count(), 1);
    }

    #[test]
    fn continue_on_error_sends_everything() {
        let mut ctx = context();
        let a = EntityRef::new(Customer::new("a"));
        let b = EntityRef::new(Customer::new("b"));
        ctx.add_object("Customers", a.clone()).unwrap();
        ctx.add_object("Customers", b.clone()).unwrap();
        ctx.transport()
            .push_response(ResponseMessage::new(StatusCode::BAD_REQUEST));
        ctx.transport()
            .push_response(created("http://host/svc/Customers('2')"));

        let err = ctx
            .save_changes(SaveChangesOptions::CONTINUE_ON_ERROR)
            .unwrap_err();
        let ClientError::SaveFailed(result) = err else {
            panic!("expected SaveFailed");
        };
        assert_eq!(result.responses.len(), 2);
        assert_eq!(result.failed().count(), 1);
        assert_eq!(ctx.get_entity_descriptor(&a).unwrap().state(), EntityState::Added);
        assert_eq!(ctx.get_entity_descriptor(&b).unwrap().state(), EntityState::Unchanged);
    }

    #[test]
    fn transport_failure_is_recorded() {
        let mut ctx = context();
        ctx.add_object("Customers", EntityRef::new(Customer::new("a"))).unwrap();
        ctx.transport()
            .push_failure(TransportFailure::new("connection reset"));

        let err = ctx.save_changes(SaveChangesOptions::NONE).unwrap_err();
        let ClientError::SaveFailed(result) = err else {
            panic!("expected SaveFailed");
        };
        assert_eq!(result.responses[0].status, None);
        assert_eq!(result.responses[0].error.as_deref(), Some("connection reset"));
    }

    #[test]
    fn response_above_ceiling_aborts() {
        let mut ctx = context_with(ClientSettings::new(ROOT).with_max_protocol_version(ProtocolVersion::V2));
        ctx.add_object("Customers", EntityRef::new(Customer::new("a"))).unwrap();
        ctx.transport().push_response(
            created("http://host/svc/Customers('1')").with_header(names::DATA_SERVICE_VERSION, "3.0;"),
        );
        let err = ctx.save_changes(SaveChangesOptions::NONE).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::ResponseVersionTooHigh { .. })
        ));
    }

    #[test]
    fn cancel_from_handler_aborts_before_send() {
        let mut ctx = context();
        let handle = ctx.cancel_handle();
        ctx.events_mut()
            .on_building_request(move |_| handle.cancel());
        ctx.add_object("Customers", EntityRef::new(Customer::new("a"))).unwrap();

        let err = ctx.save_changes(SaveChangesOptions::NONE).unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(ctx.transport().request_count(), 0);
        assert_eq!(ctx.transport().abort_count(), 1);
        assert!(ctx.has_pending_changes());
    }

    #[tokio::test]
    async fn cancel_aborts_async_save_and_query() {
        let mut ctx = context();
        let handle = ctx.cancel_handle();
        ctx.events_mut()
            .on_building_request(move |_| handle.cancel());
        ctx.add_object("Customers", EntityRef::new(Customer::new("a"))).unwrap();

        let err = ctx
            .save_changes_async(SaveChangesOptions::NONE)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        let err = ctx
            .execute_async("Customers", QueryShape::new(PayloadKind::Feed))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(ctx.transport().request_count(), 0);
        assert_eq!(ctx.transport().abort_count(), 2);
    }

    #[test]
    fn cancel_is_reset_per_operation() {
        let mut ctx = context();
        ctx.cancel();
        ctx.add_object("Customers", EntityRef::new(Customer::new("a"))).unwrap();
        ctx.transport()
            .push_response(created("http://host/svc/Customers('1')"));
        assert!(ctx.save_changes(SaveChangesOptions::NONE).is_ok());
    }

    #[test]
    fn named_stream_read_needs_v3() {
        let mut ctx =
            context_with(ClientSettings::new(ROOT).with_max_protocol_version(ProtocolVersion::V1));
        let photo = EntityRef::new(Photo);
        ctx.attach_to(
            "Photos",
            photo.clone(),
            &EntryMetadata::with_identity("http://host/svc/Photos(1)"),
        )
        .unwrap();

        let err = ctx.get_read_stream(&photo, Some("Thumbnail")).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::VersionExceedsCeiling { .. })
        ));
        assert_eq!(ctx.transport().request_count(), 0);
    }

    #[test]
    fn default_stream_read_uses_value_segment() {
        let mut ctx = context();
        let photo = EntityRef::new(Photo);
        ctx.attach_to(
            "Photos",
            photo.clone(),
            &EntryMetadata::with_identity("http://host/svc/Photos(1)"),
        )
        .unwrap();
        ctx.transport()
            .push_response(ResponseMessage::new(StatusCode::OK).with_body("bytes"));

        let response = ctx.get_read_stream(&photo, None).unwrap();
        assert_eq!(&response.body[..], b"bytes");
        assert_eq!(
            ctx.transport().requests()[0].uri,
            "http://host/svc/Photos(1)/$value"
        );
    }

    #[test]
    fn query_merges_into_tracked_entities() {
        let mut ctx = context();
        let tracked = EntityRef::new(Customer::new("Ann"));
        ctx.attach_to(
            "Customers",
            tracked.clone(),
            &EntryMetadata::with_identity("http://host/svc/Customers('1')"),
        )
        .unwrap();
        ctx.transport().push_response(ResponseMessage::new(StatusCode::OK).with_body(
            "id: http://host/svc/Customers('1')\nname: Ann\n---\nid: http://host/svc/Customers('2')\nname: Bob\n",
        ));

        let QueryResponse::Entities(entities) = ctx
            .execute("Customers", QueryShape::new(PayloadKind::Feed))
            .unwrap()
        else {
            panic!("expected entities");
        };
        assert_eq!(entities.len(), 2);
        assert!(entities[0].same_as(&tracked));
        assert_eq!(ctx.entities().len(), 2);
        assert_eq!(ctx.transport().requests()[0].uri, "http://host/svc/Customers");
    }

    #[test]
    fn query_failure_status() {
        let mut ctx = context();
        ctx.transport()
            .push_response(ResponseMessage::new(StatusCode::NOT_FOUND).with_body("missing"));
        let err = ctx
            .execute("Customers('9')", QueryShape::new(PayloadKind::Entry))
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::RequestFailed { status: StatusCode::NOT_FOUND, .. }
        ));
    }

    #[test]
    fn select_query_above_ceiling_fails_locally() {
        let mut ctx = context_with(ClientSettings::new(ROOT).with_max_protocol_version(ProtocolVersion::V1));
        let err = ctx
            .execute(
                "Customers?$select=Name",
                QueryShape::new(PayloadKind::Feed).with_select(),
            )
            .unwrap_err();
        assert!(err.is_local());
        assert_eq!(ctx.transport().request_count(), 0);
    }

    #[test]
    fn raw_query_is_returned_unparsed() {
        let mut ctx = context();
        ctx.transport()
            .push_response(ResponseMessage::new(StatusCode::OK).with_body("3"));
        let response = ctx
            .execute("Customers/$count", QueryShape::new(PayloadKind::Count).with_count())
            .unwrap();
        let QueryResponse::Raw(raw) = response else {
            panic!("expected raw response");
        };
        assert_eq!(&raw.body[..], b"3");
    }

    #[tokio::test]
    async fn async_save_and_query() {
        let mut ctx = context();
        let customer = EntityRef::new(Customer::new("Ann"));
        ctx.add_object("Customers", customer.clone()).unwrap();
        ctx.transport()
            .push_response(created("http://host/svc/Customers('42')"));
        ctx.save_changes_async(SaveChangesOptions::NONE).await.unwrap();
        assert_eq!(
            ctx.get_entity_descriptor(&customer).unwrap().state(),
            EntityState::Unchanged
        );

        ctx.transport().push_response(
            ResponseMessage::new(StatusCode::OK).with_body("id: http://host/svc/Customers('42')\n"),
        );
        let QueryResponse::Entities(entities) = ctx
            .execute_async("Customers('42')", QueryShape::new(PayloadKind::Entry))
            .await
            .unwrap()
        else {
            panic!("expected entities");
        };
        assert!(entities[0].same_as(&customer));
    }
}
