//! Save orchestration.
//!
//! A save replays the pending descriptors of the tracker in change order.
//! Each descriptor becomes one or more requests:
//!
//! | Descriptor | Requests |
//! |---|---|
//! | entity Added, media link entry | POST stream, then update |
//! | entity Added | POST entry to the entity set or parent navigation |
//! | entity Deleted | DELETE |
//! | entity with pending default stream | PUT `$value` |
//! | entity with pending named streams | PUT to each stream's edit link |
//! | entity Modified | MERGE, PUT or PATCH |
//! | link Added | POST `$links/<property>` |
//! | link Modified | PUT `$links/<property>`, or DELETE when cleared |
//! | link Deleted | DELETE `$links/<property>(<key>)` |
//!
//! [`SaveOperation`] is a step machine: the caller asks for the next
//! request, sends it and hands the outcome back. The blocking and the
//! asynchronous save share it and differ only in how they send.

use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::pipeline::{RequestPipeline, RequestSpec};
use crate::serializer::PayloadSerializer;
use crate::transport::TransportFailure;
use crate::uri::{entity_uri, key_segment, links_uri, navigation_uri, value_uri, UriResolver};
use http::{Method, StatusCode};
use odata_protocol::{
    merge_method, names, BatchItemResponse, BatchReader, BatchWriter, HeaderCollection,
    PayloadKind, ProtocolError, ProtocolVersion, RequestMessage, RequestShape, ResponseMessage,
};
use odata_tracking::{
    DescriptorKey, EntityRef, EntityState, EntityTracker, EntryMetadata, LinkKey, ObjectKey,
    TrackingError,
};
use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use tracing::{debug, trace, warn};

/// Flags controlling a save.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SaveChangesOptions(u32);

impl SaveChangesOptions {
    /// One request per change; stop at the first failure; MERGE updates.
    pub const NONE: Self = Self(0);
    /// All changes in one batch changeset.
    pub const BATCH: Self = Self(1);
    /// Keep sending after a failed change.
    pub const CONTINUE_ON_ERROR: Self = Self(2);
    /// Update with PUT instead of MERGE.
    pub const REPLACE_ON_UPDATE: Self = Self(4);
    /// Update with PATCH instead of MERGE.
    pub const PATCH_ON_UPDATE: Self = Self(8);
    /// All changes in one batch, each in its own changeset.
    pub const BATCH_WITH_INDEPENDENT_OPERATIONS: Self = Self(16);

    const ALL: u32 = 1 | 2 | 4 | 8 | 16;

    /// Wraps raw flag bits as received from a host. Unknown bits are kept
    /// and rejected by [`validate`](Self::validate).
    #[must_use]
    pub const fn from_bits_retain(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Checks the flag combination against the protocol ceiling and
    /// returns the save mode.
    pub fn validate(self, ceiling: ProtocolVersion) -> ClientResult<SaveMode> {
        if self.0 & !Self::ALL != 0 {
            return Err(ClientError::invalid_save_options(format!(
                "unknown option bits {:#x}",
                self.0 & !Self::ALL
            )));
        }
        let batch = self.contains(Self::BATCH);
        let independent = self.contains(Self::BATCH_WITH_INDEPENDENT_OPERATIONS);
        if batch && independent {
            return Err(ClientError::invalid_save_options(
                "BATCH and BATCH_WITH_INDEPENDENT_OPERATIONS are mutually exclusive",
            ));
        }
        if (batch || independent) && self.contains(Self::CONTINUE_ON_ERROR) {
            return Err(ClientError::invalid_save_options(
                "CONTINUE_ON_ERROR cannot be combined with a batch mode",
            ));
        }
        if self.contains(Self::REPLACE_ON_UPDATE) && self.contains(Self::PATCH_ON_UPDATE) {
            return Err(ClientError::invalid_save_options(
                "REPLACE_ON_UPDATE and PATCH_ON_UPDATE are mutually exclusive",
            ));
        }
        if self.contains(Self::PATCH_ON_UPDATE) && ceiling < ProtocolVersion::V3 {
            return Err(ClientError::invalid_save_options(format!(
                "PATCH_ON_UPDATE requires protocol version 3.0, ceiling is {ceiling}"
            )));
        }
        Ok(if batch {
            SaveMode::BatchChangeset
        } else if independent {
            SaveMode::BatchIndependent
        } else {
            SaveMode::PerChange
        })
    }

    fn update_method(self) -> Method {
        if self.contains(Self::REPLACE_ON_UPDATE) {
            Method::PUT
        } else if self.contains(Self::PATCH_ON_UPDATE) {
            Method::PATCH
        } else {
            merge_method()
        }
    }
}

impl BitOr for SaveChangesOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SaveChangesOptions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for SaveChangesOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(SaveChangesOptions, &str); 5] = [
            (SaveChangesOptions::BATCH, "BATCH"),
            (SaveChangesOptions::CONTINUE_ON_ERROR, "CONTINUE_ON_ERROR"),
            (SaveChangesOptions::REPLACE_ON_UPDATE, "REPLACE_ON_UPDATE"),
            (SaveChangesOptions::PATCH_ON_UPDATE, "PATCH_ON_UPDATE"),
            (
                SaveChangesOptions::BATCH_WITH_INDEPENDENT_OPERATIONS,
                "BATCH_WITH_INDEPENDENT_OPERATIONS",
            ),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("NONE")
        } else {
            f.write_str(&set.join(" | "))
        }
    }
}

/// How a save is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// One request per change.
    PerChange,
    /// One batch with a single changeset.
    BatchChangeset,
    /// One batch with a changeset per change.
    BatchIndependent,
}

impl SaveMode {
    fn is_batch(self) -> bool {
        self != Self::PerChange
    }
}

/// Outcome of one request of a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeOperationResponse {
    /// Descriptor the request was for.
    pub descriptor: DescriptorKey,
    /// Response status, absent if the transport failed without one.
    pub status: Option<StatusCode>,
    /// Response headers.
    pub headers: HeaderCollection,
    /// Failure description, absent on success.
    pub error: Option<String>,
}

impl ChangeOperationResponse {
    /// Returns true if the change was accepted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Responses of a save, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveResult {
    /// One entry per request, or per batch part.
    pub responses: Vec<ChangeOperationResponse>,
    /// Status of the batch envelope, for batch saves.
    pub batch_status: Option<StatusCode>,
}

impl SaveResult {
    /// Returns true if every change was accepted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.responses.iter().all(ChangeOperationResponse::is_success)
    }

    /// Failed changes.
    pub fn failed(&self) -> impl Iterator<Item = &ChangeOperationResponse> {
        self.responses.iter().filter(|r| !r.is_success())
    }
}

/// Collaborators a save reads from.
#[derive(Clone, Copy)]
pub(crate) struct SaveEnv<'a> {
    pub pipeline: &'a RequestPipeline,
    pub serializer: &'a dyn PayloadSerializer,
    pub resolver: &'a dyn UriResolver,
    pub settings: &'a ClientSettings,
}

impl SaveEnv<'_> {
    fn ceiling(&self) -> ProtocolVersion {
        self.settings.max_protocol_version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    MediaResource,
    Insert,
    Update,
    Delete,
    DefaultStream,
    NamedStream(String),
    AddLink,
    SetLink,
    DeleteLink,
}

#[derive(Debug, Clone)]
enum ChangeTarget {
    Entity(EntityRef),
    Link(LinkKey),
}

#[derive(Debug)]
struct PlannedChange {
    key: DescriptorKey,
    target: ChangeTarget,
    actions: Vec<Action>,
    done: usize,
    failed: bool,
}

/// One part of a batch, in wire order.
#[derive(Debug, Clone, Copy)]
struct BatchPart {
    change: usize,
    action: usize,
}

enum Phase {
    PerChange {
        current: usize,
        in_flight: Option<usize>,
    },
    Batch {
        parts: Vec<BatchPart>,
        sent: bool,
    },
}

/// A save in progress.
pub(crate) struct SaveOperation {
    mode: SaveMode,
    options: SaveChangesOptions,
    plan: Vec<PlannedChange>,
    phase: Phase,
    result: SaveResult,
    stopped: bool,
}

impl SaveOperation {
    /// Validates the options and snapshots the pending changes.
    pub fn new(
        tracker: &EntityTracker,
        options: SaveChangesOptions,
        env: &SaveEnv<'_>,
    ) -> ClientResult<Self> {
        let mode = options.validate(env.ceiling())?;
        let mut plan = Vec::new();

        for key in tracker.pending() {
            match &key {
                DescriptorKey::Entity(object) => {
                    let descriptor = tracker
                        .try_get_by_key(*object)
                        .ok_or_else(|| TrackingError::not_tracked("entity"))?;
                    if mode.is_batch() && descriptor.is_media_link_insert() {
                        return Err(ClientError::invalid_save_options(format!(
                            "media link entry of type {} cannot be created in a batch",
                            descriptor.entity().type_name()
                        )));
                    }
                    let mut actions = Vec::new();
                    match descriptor.state() {
                        EntityState::Added if descriptor.save_stream().is_some() => {
                            actions.push(Action::MediaResource);
                            actions.push(Action::Update);
                        }
                        EntityState::Added => actions.push(Action::Insert),
                        EntityState::Deleted => actions.push(Action::Delete),
                        state => {
                            if descriptor.save_stream().is_some() {
                                actions.push(Action::DefaultStream);
                            }
                            actions.extend(
                                descriptor
                                    .modified_named_streams()
                                    .map(|s| Action::NamedStream(s.name().to_string())),
                            );
                            if state == EntityState::Modified {
                                actions.push(Action::Update);
                            }
                        }
                    }
                    plan.push(PlannedChange {
                        key: key.clone(),
                        target: ChangeTarget::Entity(descriptor.entity().clone()),
                        actions,
                        done: 0,
                        failed: false,
                    });
                }
                DescriptorKey::Link(link_key) => {
                    let Some(link) = tracker.link(link_key) else {
                        continue;
                    };
                    let action = match link.state() {
                        EntityState::Added => Action::AddLink,
                        EntityState::Deleted => Action::DeleteLink,
                        _ => Action::SetLink,
                    };
                    plan.push(PlannedChange {
                        key: key.clone(),
                        target: ChangeTarget::Link(link_key.clone()),
                        actions: vec![action],
                        done: 0,
                        failed: false,
                    });
                }
            }
        }

        let requests: usize = plan.iter().map(|c| c.actions.len()).sum();
        debug!(?options, ?mode, changes = plan.len(), requests, "save planned");

        let phase = if mode.is_batch() {
            Phase::Batch {
                parts: Vec::new(),
                sent: false,
            }
        } else {
            Phase::PerChange {
                current: 0,
                in_flight: None,
            }
        };
        Ok(Self {
            mode,
            options,
            plan,
            phase,
            result: SaveResult::default(),
            stopped: false,
        })
    }

    /// Builds the next request to send, with the descriptor it is for.
    ///
    /// Returns `None` when the save is complete.
    pub fn next_request(
        &mut self,
        tracker: &EntityTracker,
        env: &SaveEnv<'_>,
    ) -> ClientResult<Option<(RequestMessage, Option<DescriptorKey>)>> {
        match self.phase {
            Phase::Batch { sent: true, .. } => Ok(None),
            Phase::Batch { sent: false, .. } => {
                if self.plan.is_empty() {
                    return Ok(None);
                }
                let (request, parts) = self.build_batch(tracker, env)?;
                self.phase = Phase::Batch { parts, sent: true };
                Ok(Some((request, None)))
            }
            Phase::PerChange { .. } => self.next_change_request(tracker, env),
        }
    }

    fn next_change_request(
        &mut self,
        tracker: &EntityTracker,
        env: &SaveEnv<'_>,
    ) -> ClientResult<Option<(RequestMessage, Option<DescriptorKey>)>> {
        loop {
            let Phase::PerChange { current, .. } = self.phase else {
                return Ok(None);
            };
            if self.stopped {
                return Ok(None);
            }
            let Some(change) = self.plan.get(current) else {
                return Ok(None);
            };
            if change.failed || change.done >= change.actions.len() {
                self.phase = Phase::PerChange {
                    current: current + 1,
                    in_flight: None,
                };
                continue;
            }

            let done = change.done;
            let action = change.actions[done].clone();
            let key = change.key.clone();
            match self.build_action(tracker, env, current, &action, None) {
                Ok(spec) => {
                    let request = env.pipeline.build(spec)?;
                    trace!(?action, method = %request.method, uri = %request.uri, "save step");
                    self.phase = Phase::PerChange {
                        current,
                        in_flight: Some(done),
                    };
                    return Ok(Some((request, Some(key))));
                }
                Err(ClientError::Uri { message })
                    if self.options.contains(SaveChangesOptions::CONTINUE_ON_ERROR) =>
                {
                    warn!(?action, error = %message, "change skipped");
                    self.record(current, None, HeaderCollection::new(), Some(message));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Applies the outcome of the request returned by the last
    /// [`next_request`](Self::next_request).
    ///
    /// A response declaring a version above the ceiling aborts the save.
    pub fn handle_response(
        &mut self,
        tracker: &mut EntityTracker,
        env: &SaveEnv<'_>,
        outcome: Result<ResponseMessage, TransportFailure>,
    ) -> ClientResult<()> {
        match &mut self.phase {
            Phase::PerChange { current, in_flight } => {
                let current = *current;
                let Some(action) = in_flight.take() else {
                    return Ok(());
                };
                if let Ok(response) = &outcome {
                    response.validate_version(env.ceiling())?;
                }
                self.complete(tracker, env, current, action, outcome)
            }
            Phase::Batch { parts, .. } => {
                let parts = parts.clone();
                self.handle_batch(tracker, env, &parts, outcome)
            }
        }
    }

    /// Ends the save. Fails with [`ClientError::SaveFailed`] if any change
    /// was rejected.
    pub fn finish(self) -> ClientResult<SaveResult> {
        if self.result.is_success() {
            debug!(responses = self.result.responses.len(), "save complete");
            Ok(self.result)
        } else {
            Err(ClientError::SaveFailed(Box::new(self.result)))
        }
    }

    fn record(
        &mut self,
        change: usize,
        status: Option<StatusCode>,
        headers: HeaderCollection,
        error: Option<String>,
    ) {
        let Some(planned) = self.plan.get_mut(change) else {
            return;
        };
        if error.is_some() {
            planned.failed = true;
            if !self.options.contains(SaveChangesOptions::CONTINUE_ON_ERROR) {
                self.stopped = true;
            }
        }
        self.result.responses.push(ChangeOperationResponse {
            descriptor: planned.key.clone(),
            status,
            headers,
            error,
        });
    }

    fn complete(
        &mut self,
        tracker: &mut EntityTracker,
        env: &SaveEnv<'_>,
        change: usize,
        action: usize,
        outcome: Result<ResponseMessage, TransportFailure>,
    ) -> ClientResult<()> {
        let response = match outcome {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                let message = failure_message(&response);
                warn!(status = %response.status, error = %message, "change rejected");
                self.record(change, Some(response.status), response.headers, Some(message));
                return Ok(());
            }
            Err(failure) => {
                warn!(error = %failure, "change not delivered");
                let (status, headers) = failure
                    .response
                    .map(|r| (Some(r.status), r.headers))
                    .unwrap_or_default();
                self.record(change, status, headers, Some(failure.message));
                return Ok(());
            }
        };

        let planned = &self.plan[change];
        let step = planned.actions[action].clone();
        let target = planned.target.clone();
        if let Err(e) = apply_response(tracker, env, &target, &step, &response) {
            // the server accepted the change; the tracker could not take it in
            self.record(
                change,
                Some(response.status),
                response.headers,
                Some(e.to_string()),
            );
            return Ok(());
        }

        let planned = &mut self.plan[change];
        planned.done += 1;
        let finished = planned.done == planned.actions.len() && !planned.failed;
        self.record(change, Some(response.status), response.headers, None);
        if finished {
            match &target {
                ChangeTarget::Entity(entity) => tracker.accept_entity_change(entity)?,
                ChangeTarget::Link(key) => tracker.accept_link_change(key)?,
            }
        }
        Ok(())
    }

    fn handle_batch(
        &mut self,
        tracker: &mut EntityTracker,
        env: &SaveEnv<'_>,
        parts: &[BatchPart],
        outcome: Result<ResponseMessage, TransportFailure>,
    ) -> ClientResult<()> {
        let response = outcome?;
        response.validate_version(env.ceiling())?;
        self.result.batch_status = Some(response.status);

        if !response.is_success() {
            let message = failure_message(&response);
            warn!(status = %response.status, error = %message, "batch rejected");
            for part in parts {
                self.record(
                    part.change,
                    Some(response.status),
                    HeaderCollection::new(),
                    Some(message.clone()),
                );
            }
            return Ok(());
        }

        let items = BatchReader::read_response(&response)?;
        let group_sizes: Vec<usize> = match self.mode {
            SaveMode::BatchIndependent => vec![1; parts.len()],
            _ => vec![parts.len()],
        };
        if items.len() != group_sizes.len() {
            return Err(ProtocolError::invalid_batch(format!(
                "expected {} batch responses, got {}",
                group_sizes.len(),
                items.len()
            ))
            .into());
        }

        let mut responses = Vec::with_capacity(parts.len());
        for (item, size) in items.into_iter().zip(group_sizes) {
            match item {
                BatchItemResponse::ChangeSet(members) if members.len() == size => {
                    responses.extend(members);
                }
                BatchItemResponse::ChangeSet(members) => {
                    return Err(ProtocolError::invalid_batch(format!(
                        "changeset has {} responses for {size} requests",
                        members.len()
                    ))
                    .into());
                }
                BatchItemResponse::Operation(single) => {
                    responses.extend(std::iter::repeat(single).take(size));
                }
            }
        }

        for (part, response) in parts.iter().zip(responses) {
            env.pipeline
                .observe_part(Some(&response), Some(&self.plan[part.change].key));
            response.validate_version(env.ceiling())?;
            self.complete(tracker, env, part.change, part.action, Ok(response))?;
        }
        Ok(())
    }

    fn build_batch(
        &self,
        tracker: &EntityTracker,
        env: &SaveEnv<'_>,
    ) -> ClientResult<(RequestMessage, Vec<BatchPart>)> {
        let mut writer = BatchWriter::new();
        let mut refs: HashMap<ObjectKey, u32> = HashMap::new();
        let mut parts = Vec::new();
        let mut shape = RequestShape::new();
        let single_changeset = self.mode == SaveMode::BatchChangeset;

        if single_changeset {
            writer.begin_changeset()?;
        }
        for (index, change) in self.plan.iter().enumerate() {
            for (action_index, action) in change.actions.iter().enumerate() {
                let content_id = u32::try_from(parts.len() + 1)
                    .map_err(|_| ProtocolError::invalid_batch("too many batch parts"))?;
                let spec = self.build_action(tracker, env, index, action, Some(&refs))?;
                let request = env.pipeline.build_batch_part(spec)?;
                if let Some(version) = request.headers.data_service_version()? {
                    if version > shape.required_version() {
                        shape = raise_shape(shape, version);
                    }
                }

                if !single_changeset {
                    writer.begin_changeset()?;
                }
                writer.write_change(content_id, &request)?;
                if !single_changeset {
                    writer.end_changeset()?;
                }

                if *action == Action::Insert {
                    if let ChangeTarget::Entity(entity) = &change.target {
                        refs.insert(entity.key(), content_id);
                    }
                }
                parts.push(BatchPart {
                    change: index,
                    action: action_index,
                });
            }
        }
        if single_changeset {
            writer.end_changeset()?;
        }

        let request = env
            .pipeline
            .build_batch(env.resolver.batch_uri()?, writer, shape)?;
        debug!(parts = parts.len(), mode = ?self.mode, "batch built");
        Ok((request, parts))
    }

    fn build_action(
        &self,
        tracker: &EntityTracker,
        env: &SaveEnv<'_>,
        change: usize,
        action: &Action,
        refs: Option<&HashMap<ObjectKey, u32>>,
    ) -> ClientResult<RequestSpec> {
        let planned = &self.plan[change];
        match &planned.target {
            ChangeTarget::Entity(entity) => {
                build_entity_request(tracker, env, self.options, entity, action, refs)
            }
            ChangeTarget::Link(key) => build_link_request(tracker, env, key, action, refs),
        }
        .map(|spec| spec.for_descriptor(planned.key.clone()))
    }
}

/// Smallest shape whose required version is at least `version`.
fn raise_shape(shape: RequestShape, version: ProtocolVersion) -> RequestShape {
    match version {
        ProtocolVersion::V1 => shape,
        ProtocolVersion::V2 => shape.with_continuation(),
        ProtocolVersion::V3 => shape.with_named_stream(),
    }
}

fn failure_message(response: &ResponseMessage) -> String {
    let body = String::from_utf8_lossy(&response.body);
    let body = body.trim();
    if body.is_empty() {
        response
            .status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

fn content_ref(refs: Option<&HashMap<ObjectKey, u32>>, key: ObjectKey) -> Option<String> {
    refs.and_then(|r| r.get(&key)).map(|id| format!("${id}"))
}

fn target_uri(
    tracker: &EntityTracker,
    env: &SaveEnv<'_>,
    entity: &EntityRef,
    refs: Option<&HashMap<ObjectKey, u32>>,
) -> ClientResult<String> {
    if let Some(reference) = content_ref(refs, entity.key()) {
        return Ok(reference);
    }
    entity_uri(env.resolver, tracker.get(entity)?)
}

fn prefer(spec: RequestSpec, settings: &ClientSettings) -> RequestSpec {
    match settings.add_and_update_response_preference.header_value() {
        Some(value) => spec.with_header(names::PREFER, value),
        None => spec,
    }
}

fn if_match(spec: RequestSpec, etag: Option<&str>) -> RequestSpec {
    match etag {
        Some(etag) => spec.with_header(names::IF_MATCH, etag),
        None => spec,
    }
}

fn build_entity_request(
    tracker: &EntityTracker,
    env: &SaveEnv<'_>,
    options: SaveChangesOptions,
    entity: &EntityRef,
    action: &Action,
    refs: Option<&HashMap<ObjectKey, u32>>,
) -> ClientResult<RequestSpec> {
    let descriptor = tracker.get(entity)?;
    let entry_content_type = || env.pipeline.negotiator().content_type(PayloadKind::Entry);
    let serialize = |content_type: &str| {
        env.serializer
            .write_entry(descriptor, content_type)
            .map_err(ClientError::serialization)
    };

    let insert_uri = || -> ClientResult<String> {
        match descriptor.parent() {
            Some(parent) => {
                let parent_uri = target_uri(tracker, env, &parent.source, refs)?;
                Ok(navigation_uri(&parent_uri, &parent.property))
            }
            None => {
                let set = descriptor.entity_set().ok_or_else(|| {
                    ClientError::uri(format!(
                        "entity of type {} has no entity set",
                        entity.type_name()
                    ))
                })?;
                env.resolver.entity_set_uri(set)
            }
        }
    };

    let spec = match action {
        Action::MediaResource => {
            let stream = descriptor
                .save_stream()
                .ok_or_else(|| ClientError::serialization("media resource has no stream"))?;
            let mut spec = RequestSpec::new(Method::POST, insert_uri()?, PayloadKind::Entry)
                .with_raw_body(stream.content_type.clone(), stream.body.clone());
            if let Some(slug) = &stream.slug {
                spec = spec.with_header(names::SLUG, slug.clone());
            }
            spec
        }
        Action::Insert => {
            let content_type = entry_content_type()?;
            let body = serialize(content_type)?;
            prefer(
                RequestSpec::new(Method::POST, insert_uri()?, PayloadKind::Entry)
                    .with_payload(PayloadKind::Entry, body),
                env.settings,
            )
        }
        Action::Update => {
            let content_type = entry_content_type()?;
            let body = serialize(content_type)?;
            let uri = entity_uri(env.resolver, descriptor)?;
            let spec = RequestSpec::new(options.update_method(), uri, PayloadKind::Entry)
                .with_payload(PayloadKind::Entry, body);
            prefer(if_match(spec, descriptor.etag()), env.settings)
        }
        Action::Delete => {
            let uri = entity_uri(env.resolver, descriptor)?;
            if_match(
                RequestSpec::new(Method::DELETE, uri, PayloadKind::Entry),
                descriptor.etag(),
            )
        }
        Action::DefaultStream => {
            let stream = descriptor
                .save_stream()
                .ok_or_else(|| ClientError::serialization("no pending stream"))?;
            let uri = match descriptor.edit_stream_uri() {
                Some(link) => env.resolver.resolve(link)?,
                None => value_uri(&entity_uri(env.resolver, descriptor)?),
            };
            if_match(
                RequestSpec::new(Method::PUT, uri, PayloadKind::Stream)
                    .with_raw_body(stream.content_type.clone(), stream.body.clone()),
                descriptor.stream_etag(),
            )
        }
        Action::NamedStream(name) => {
            let stream = descriptor
                .named_stream(name)
                .ok_or_else(|| ClientError::serialization(format!("unknown stream {name}")))?;
            let payload = stream
                .save_stream()
                .ok_or_else(|| ClientError::serialization(format!("stream {name} has no payload")))?;
            let link = stream.edit_link().ok_or_else(|| {
                ClientError::uri(format!("named stream {name} has no edit link"))
            })?;
            if_match(
                RequestSpec::new(Method::PUT, env.resolver.resolve(link)?, PayloadKind::Stream)
                    .with_shape(RequestShape::new().with_named_stream())
                    .with_raw_body(payload.content_type.clone(), payload.body.clone()),
                stream.etag(),
            )
        }
        Action::AddLink | Action::SetLink | Action::DeleteLink => {
            return Err(ClientError::serialization("link action on an entity"));
        }
    };
    Ok(spec)
}

fn build_link_request(
    tracker: &EntityTracker,
    env: &SaveEnv<'_>,
    key: &LinkKey,
    action: &Action,
    refs: Option<&HashMap<ObjectKey, u32>>,
) -> ClientResult<RequestSpec> {
    let link = tracker
        .link(key)
        .ok_or_else(|| TrackingError::not_tracked("link"))?;
    let source_uri = target_uri(tracker, env, link.source(), refs)?;
    let uri = links_uri(&source_uri, link.source_property());
    let link_content_type = || {
        env.pipeline
            .negotiator()
            .content_type(PayloadKind::EntityReferenceLinks)
    };

    let spec = match (action, link.target()) {
        (Action::AddLink | Action::SetLink, Some(target)) => {
            let target = target_uri(tracker, env, target, refs)?;
            let content_type = link_content_type()?;
            let body = env
                .serializer
                .write_link(&target, content_type)
                .map_err(ClientError::serialization)?;
            let method = if *action == Action::AddLink {
                Method::POST
            } else {
                Method::PUT
            };
            RequestSpec::new(method, uri, PayloadKind::EntityReferenceLinks)
                .with_payload(PayloadKind::EntityReferenceLinks, body)
        }
        (Action::SetLink, None) => {
            RequestSpec::new(Method::DELETE, uri, PayloadKind::EntityReferenceLinks)
        }
        (Action::DeleteLink, target) => {
            let uri = match target {
                Some(target) if link.is_collection() => {
                    let target = target_uri(tracker, env, target, refs)?;
                    let predicate = key_segment(&target).ok_or_else(|| {
                        ClientError::uri(format!("cannot derive a key from {target}"))
                    })?;
                    format!("{uri}{predicate}")
                }
                _ => uri,
            };
            RequestSpec::new(Method::DELETE, uri, PayloadKind::EntityReferenceLinks)
        }
        _ => {
            return Err(ClientError::uri(format!(
                "link through {} has no target",
                link.source_property()
            )));
        }
    };
    Ok(spec)
}

fn response_metadata(
    env: &SaveEnv<'_>,
    response: &ResponseMessage,
) -> ClientResult<EntryMetadata> {
    if !response.body.is_empty() && response.status != StatusCode::NO_CONTENT {
        return env
            .serializer
            .read_entry(response)
            .map_err(ClientError::serialization);
    }
    let mut metadata = EntryMetadata::default();
    if let Some(location) = response.location() {
        metadata.identity = Some(location.to_string());
        metadata.edit_link = Some(location.to_string());
    }
    metadata.etag = response.etag().map(str::to_string);
    Ok(metadata)
}

fn apply_response(
    tracker: &mut EntityTracker,
    env: &SaveEnv<'_>,
    target: &ChangeTarget,
    action: &Action,
    response: &ResponseMessage,
) -> ClientResult<()> {
    let ChangeTarget::Entity(entity) = target else {
        return Ok(());
    };
    match action {
        Action::MediaResource => {
            let metadata = response_metadata(env, response)?;
            tracker.accept_media_resource(entity, &metadata)?;
        }
        Action::Insert | Action::Update => {
            let metadata = response_metadata(env, response)?;
            tracker.apply_entry_metadata(entity, &metadata)?;
        }
        Action::DefaultStream => {
            let metadata = EntryMetadata {
                stream_etag: response.etag().map(str::to_string),
                ..EntryMetadata::default()
            };
            tracker.apply_entry_metadata(entity, &metadata)?;
            tracker.clear_save_stream(entity)?;
        }
        Action::NamedStream(name) => {
            tracker.accept_named_stream(entity, name, response.etag().map(str::to_string))?;
        }
        Action::Delete | Action::AddLink | Action::SetLink | Action::DeleteLink => {}
    }
    Ok(())
}
