//! An in-memory OData service.
//!
//! Answers the requests a per-change save and simple queries produce:
//! entry inserts (to an entity set or through a navigation property),
//! media resource inserts, MERGE/PUT/PATCH updates, deletes, `$value` and
//! named stream writes, and `$links` changes. Concurrency tokens are
//! checked against `If-Match`. Batch requests are not understood; use a
//! [`MockTransport`](odata_client::MockTransport) with a
//! [`BatchResponseBuilder`](crate::BatchResponseBuilder) for those.

use crate::responses::error_response;
use crate::serializer::{WireEntry, WireStream};
use bytes::Bytes;
use http::{Method, StatusCode};
use odata_client::{AsyncTransport, Transport, TransportFailure};
use odata_protocol::{media_types, merge_method, names, RequestMessage, ResponseMessage};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct StoredEntry {
    entity_set: String,
    type_name: Option<String>,
    properties: Value,
    version: u32,
    stream: Option<(String, Bytes)>,
    named_streams: BTreeMap<String, (u32, Bytes)>,
}

impl StoredEntry {
    fn etag(&self) -> String {
        format!("W/\"{}\"", self.version)
    }
}

#[derive(Debug, Default)]
struct ServiceState {
    next_id: u32,
    entries: BTreeMap<String, StoredEntry>,
    links: BTreeSet<(String, String, String)>,
}

/// A transport backed by an in-memory entity store.
pub struct InMemoryService {
    root: String,
    state: Mutex<ServiceState>,
    named_streams: HashMap<String, Vec<String>>,
    failures: Mutex<HashMap<String, StatusCode>>,
    requests: Mutex<Vec<RequestMessage>>,
    aborts: AtomicUsize,
}

impl InMemoryService {
    /// Creates an empty service rooted at `root`.
    ///
    /// `Photos` entries advertise a `Thumbnail` named stream.
    pub fn new(root: &str) -> Self {
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        Self {
            root,
            state: Mutex::new(ServiceState::default()),
            named_streams: HashMap::from([("Photos".to_string(), vec!["Thumbnail".to_string()])]),
            failures: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            aborts: AtomicUsize::new(0),
        }
    }

    /// Seeds an entry and returns its relative path.
    pub fn seed(&self, entity_set: &str, type_name: &str, properties: Value) -> String {
        let mut state = self.state.lock();
        state.next_id += 1;
        let path = format!("{entity_set}({})", state.next_id);
        state.entries.insert(
            path.clone(),
            StoredEntry {
                entity_set: entity_set.to_string(),
                type_name: Some(type_name.to_string()),
                properties,
                version: 1,
                stream: None,
                named_streams: BTreeMap::new(),
            },
        );
        path
    }

    /// Answers every request to `path` (relative, without query) with
    /// `status`.
    pub fn fail_on(&self, path: &str, status: StatusCode) {
        self.failures.lock().insert(path.to_string(), status);
    }

    /// Absolute URI of a relative path.
    pub fn uri(&self, path: &str) -> String {
        format!("{}{path}", self.root)
    }

    /// Returns true if an entry exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.state.lock().entries.contains_key(path)
    }

    /// Number of stored entries.
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Properties of the entry at `path`.
    pub fn properties(&self, path: &str) -> Option<Value> {
        self.state.lock().entries.get(path).map(|e| e.properties.clone())
    }

    /// ETag of the entry at `path`.
    pub fn etag(&self, path: &str) -> Option<String> {
        self.state.lock().entries.get(path).map(StoredEntry::etag)
    }

    /// Default stream of the entry at `path`.
    pub fn stream(&self, path: &str) -> Option<Bytes> {
        self.state
            .lock()
            .entries
            .get(path)
            .and_then(|e| e.stream.as_ref().map(|(_, body)| body.clone()))
    }

    /// A named stream of the entry at `path`.
    pub fn named_stream(&self, path: &str, name: &str) -> Option<Bytes> {
        self.state
            .lock()
            .entries
            .get(path)
            .and_then(|e| e.named_streams.get(name).map(|(_, body)| body.clone()))
    }

    /// Paths linked from `source` through `property`.
    pub fn links(&self, source: &str, property: &str) -> Vec<String> {
        self.state
            .lock()
            .links
            .iter()
            .filter(|(s, p, _)| s == source && p == property)
            .map(|(_, _, t)| t.clone())
            .collect()
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<RequestMessage> {
        self.requests.lock().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of abort calls.
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    fn relative<'a>(&self, uri: &'a str) -> Option<&'a str> {
        let path = uri.strip_prefix(&self.root).unwrap_or(uri);
        if path.contains("://") {
            return None;
        }
        Some(path.split('?').next().unwrap_or(path))
    }

    fn entry_wire(&self, path: &str, entry: &StoredEntry) -> WireEntry {
        let streams = self
            .named_streams
            .get(&entry.entity_set)
            .into_iter()
            .flatten()
            .map(|name| WireStream {
                name: name.clone(),
                read_link: Some(format!("{path}/{name}")),
                edit_link: Some(format!("{path}/{name}")),
                content_type: None,
                etag: entry
                    .named_streams
                    .get(name)
                    .map(|(v, _)| format!("W/\"{v}\"")),
            })
            .collect();
        WireEntry {
            type_name: entry.type_name.clone(),
            entity_set: Some(entry.entity_set.clone()),
            id: Some(self.uri(path)),
            edit_link: Some(path.to_string()),
            read_link: None,
            etag: Some(entry.etag()),
            media_read_link: entry.stream.as_ref().map(|_| format!("{path}/$value")),
            media_edit_link: entry.stream.as_ref().map(|_| format!("{path}/$value")),
            media_etag: entry.stream.as_ref().map(|_| entry.etag()),
            streams,
            properties: entry.properties.clone(),
        }
    }

    fn entry_response(&self, status: StatusCode, path: &str, entry: &StoredEntry) -> ResponseMessage {
        let body = serde_json::to_vec(&self.entry_wire(path, entry)).unwrap_or_default();
        ResponseMessage::new(status)
            .with_header(names::DATA_SERVICE_VERSION, "1.0;")
            .with_header(names::CONTENT_TYPE, "application/json")
            .with_header(names::ETAG, entry.etag())
            .with_body(body)
    }

    fn feed_response(&self, entries: Vec<(String, StoredEntry)>) -> ResponseMessage {
        let value: Vec<WireEntry> = entries
            .iter()
            .map(|(path, entry)| self.entry_wire(path, entry))
            .collect();
        let body = serde_json::to_vec(&serde_json::json!({ "value": value })).unwrap_or_default();
        ResponseMessage::new(StatusCode::OK)
            .with_header(names::DATA_SERVICE_VERSION, "1.0;")
            .with_header(names::CONTENT_TYPE, "application/json")
            .with_body(body)
    }

    /// `201` with the entry, or `204` with headers when the client asked
    /// for no content.
    fn created_response(&self, request: &RequestMessage, path: &str, entry: &StoredEntry) -> ResponseMessage {
        let location = self.uri(path);
        match request.header(names::PREFER) {
            Some("return-no-content") => ResponseMessage::new(StatusCode::NO_CONTENT)
                .with_header(names::DATA_SERVICE_VERSION, "3.0;")
                .with_header(names::PREFERENCE_APPLIED, "return-no-content")
                .with_header(names::LOCATION, location)
                .with_header(names::ETAG, entry.etag()),
            _ => self
                .entry_response(StatusCode::CREATED, path, entry)
                .with_header(names::LOCATION, location),
        }
    }

    fn handle(&self, request: &RequestMessage) -> ResponseMessage {
        let method = match request.header(names::X_HTTP_METHOD) {
            Some(tunneled) if request.method == Method::POST => {
                Method::from_bytes(tunneled.as_bytes()).unwrap_or(Method::POST)
            }
            _ => request.method.clone(),
        };
        let Some(path) = self.relative(&request.uri) else {
            return error_response(StatusCode::NOT_FOUND, "foreign service");
        };
        if let Some(status) = self.failures.lock().get(path) {
            return error_response(*status, "rejected by service");
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut state = self.state.lock();
        match segments.as_slice() {
            ["$batch"] => error_response(StatusCode::NOT_IMPLEMENTED, "batch not supported"),
            [set] if !set.contains('(') => match method {
                Method::POST => self.insert(&mut state, request, set, None),
                Method::GET => {
                    let entries = state
                        .entries
                        .iter()
                        .filter(|(_, e)| e.entity_set == *set)
                        .map(|(p, e)| (p.clone(), e.clone()))
                        .collect();
                    self.feed_response(entries)
                }
                _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "not allowed on a set"),
            },
            [entity] => self.entity_request(&mut state, request, &method, entity),
            [entity, "$value"] => self.stream_request(&mut state, request, &method, entity),
            [entity, "$links", property] => {
                self.link_request(&mut state, request, &method, entity, property)
            }
            [entity, property] => {
                let is_named_stream = state.entries.get(*entity).is_some_and(|e| {
                    self.named_streams
                        .get(&e.entity_set)
                        .is_some_and(|streams| streams.iter().any(|n| n == *property))
                });
                if is_named_stream {
                    self.named_stream_request(&mut state, request, &method, entity, property)
                } else {
                    self.navigation_request(&mut state, request, &method, entity, property)
                }
            }
            _ => error_response(StatusCode::NOT_FOUND, "unknown resource"),
        }
    }

    fn insert(
        &self,
        state: &mut ServiceState,
        request: &RequestMessage,
        set: &str,
        parent: Option<(&str, &str)>,
    ) -> ResponseMessage {
        let content_type = request.header(names::CONTENT_TYPE).unwrap_or_default();
        let is_entry = content_type.starts_with(media_types::ATOM)
            || content_type.starts_with("application/json");
        let entry = if is_entry {
            let Ok(wire) = serde_json::from_slice::<WireEntry>(&request.body) else {
                return error_response(StatusCode::BAD_REQUEST, "malformed entry");
            };
            StoredEntry {
                entity_set: set.to_string(),
                type_name: wire.type_name,
                properties: wire.properties,
                version: 1,
                stream: None,
                named_streams: BTreeMap::new(),
            }
        } else {
            StoredEntry {
                entity_set: set.to_string(),
                type_name: None,
                properties: Value::Null,
                version: 1,
                stream: Some((content_type.to_string(), request.body.clone())),
                named_streams: BTreeMap::new(),
            }
        };

        state.next_id += 1;
        let path = format!("{set}({})", state.next_id);
        state.entries.insert(path.clone(), entry.clone());
        if let Some((source, property)) = parent {
            state
                .links
                .insert((source.to_string(), property.to_string(), path.clone()));
        }
        self.created_response(request, &path, &entry)
    }

    fn entity_request(
        &self,
        state: &mut ServiceState,
        request: &RequestMessage,
        method: &Method,
        entity: &str,
    ) -> ResponseMessage {
        let Some(entry) = state.entries.get(entity).cloned() else {
            return error_response(StatusCode::NOT_FOUND, "no such entity");
        };
        if *method != Method::GET {
            if let Some(expected) = request.header(names::IF_MATCH) {
                if expected != entry.etag() {
                    return error_response(StatusCode::PRECONDITION_FAILED, "etag mismatch");
                }
            }
        }

        match method {
            m if *m == Method::GET => self.entry_response(StatusCode::OK, entity, &entry),
            m if *m == Method::DELETE => {
                state.entries.remove(entity);
                state.links.retain(|(s, _, t)| s != entity && t != entity);
                ResponseMessage::new(StatusCode::NO_CONTENT)
            }
            m if *m == Method::PUT || *m == Method::PATCH || *m == merge_method() => {
                let Ok(wire) = serde_json::from_slice::<WireEntry>(&request.body) else {
                    return error_response(StatusCode::BAD_REQUEST, "malformed entry");
                };
                let Some(stored) = state.entries.get_mut(entity) else {
                    return error_response(StatusCode::NOT_FOUND, "no such entity");
                };
                match (&mut stored.properties, wire.properties) {
                    (Value::Object(current), Value::Object(update)) if *m != Method::PUT => {
                        current.extend(update);
                    }
                    (current, update) => *current = update,
                }
                if wire.type_name.is_some() {
                    stored.type_name = wire.type_name;
                }
                stored.version += 1;
                let stored = stored.clone();
                match request.header(names::PREFER) {
                    Some("return-content") => self
                        .entry_response(StatusCode::OK, entity, &stored)
                        .with_header(names::PREFERENCE_APPLIED, "return-content"),
                    _ => ResponseMessage::new(StatusCode::NO_CONTENT)
                        .with_header(names::ETAG, stored.etag()),
                }
            }
            _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
        }
    }

    fn stream_request(
        &self,
        state: &mut ServiceState,
        request: &RequestMessage,
        method: &Method,
        entity: &str,
    ) -> ResponseMessage {
        let Some(entry) = state.entries.get_mut(entity) else {
            return error_response(StatusCode::NOT_FOUND, "no such entity");
        };
        match method {
            m if *m == Method::GET => match &entry.stream {
                Some((content_type, body)) => ResponseMessage::new(StatusCode::OK)
                    .with_header(names::CONTENT_TYPE, content_type.clone())
                    .with_body(body.clone()),
                None => error_response(StatusCode::NOT_FOUND, "no stream"),
            },
            m if *m == Method::PUT => {
                let content_type = request.header(names::CONTENT_TYPE).unwrap_or_default();
                entry.stream = Some((content_type.to_string(), request.body.clone()));
                entry.version += 1;
                ResponseMessage::new(StatusCode::NO_CONTENT).with_header(names::ETAG, entry.etag())
            }
            _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
        }
    }

    fn named_stream_request(
        &self,
        state: &mut ServiceState,
        request: &RequestMessage,
        method: &Method,
        entity: &str,
        name: &str,
    ) -> ResponseMessage {
        let Some(entry) = state.entries.get_mut(entity) else {
            return error_response(StatusCode::NOT_FOUND, "no such entity");
        };
        match method {
            m if *m == Method::GET => match entry.named_streams.get(name) {
                Some((_, body)) => ResponseMessage::new(StatusCode::OK)
                    .with_header(names::DATA_SERVICE_VERSION, "3.0;")
                    .with_body(body.clone()),
                None => error_response(StatusCode::NOT_FOUND, "no stream"),
            },
            m if *m == Method::PUT => {
                let version = entry.named_streams.get(name).map_or(1, |(v, _)| v + 1);
                entry
                    .named_streams
                    .insert(name.to_string(), (version, request.body.clone()));
                ResponseMessage::new(StatusCode::NO_CONTENT)
                    .with_header(names::DATA_SERVICE_VERSION, "3.0;")
                    .with_header(names::ETAG, format!("W/\"{version}\""))
            }
            _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
        }
    }

    fn navigation_request(
        &self,
        state: &mut ServiceState,
        request: &RequestMessage,
        method: &Method,
        entity: &str,
        property: &str,
    ) -> ResponseMessage {
        if !state.entries.contains_key(entity) {
            return error_response(StatusCode::NOT_FOUND, "no such entity");
        }
        match method {
            m if *m == Method::POST => self.insert(state, request, property, Some((entity, property))),
            m if *m == Method::GET => {
                let entries = state
                    .links
                    .iter()
                    .filter(|(s, p, _)| s == entity && p == property)
                    .filter_map(|(_, _, t)| state.entries.get(t).map(|e| (t.clone(), e.clone())))
                    .collect();
                self.feed_response(entries)
            }
            _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
        }
    }

    fn link_request(
        &self,
        state: &mut ServiceState,
        request: &RequestMessage,
        method: &Method,
        entity: &str,
        property: &str,
    ) -> ResponseMessage {
        if !state.entries.contains_key(entity) {
            return error_response(StatusCode::NOT_FOUND, "no such entity");
        }
        let target = || -> Option<String> {
            let body: Value = serde_json::from_slice(&request.body).ok()?;
            let uri = body.get("uri")?.as_str()?;
            self.relative(uri).map(str::to_string)
        };

        match method {
            m if *m == Method::POST || *m == Method::PUT => {
                let Some(target) = target() else {
                    return error_response(StatusCode::BAD_REQUEST, "malformed link");
                };
                if !state.entries.contains_key(&target) {
                    return error_response(StatusCode::NOT_FOUND, "no such target");
                }
                if *m == Method::PUT {
                    state.links.retain(|(s, p, _)| !(s == entity && p == property));
                }
                state
                    .links
                    .insert((entity.to_string(), property.to_string(), target));
                ResponseMessage::new(StatusCode::NO_CONTENT)
            }
            m if *m == Method::DELETE => {
                // `Orders(3)` names one member; a bare property clears a reference
                let (name, key) = match property.find('(') {
                    Some(at) => (&property[..at], Some(&property[at..])),
                    None => (property, None),
                };
                let before = state.links.len();
                state.links.retain(|(s, p, t)| {
                    !(s == entity && p == name && key.map_or(true, |k| t.ends_with(k)))
                });
                if state.links.len() == before {
                    return error_response(StatusCode::NOT_FOUND, "no such link");
                }
                ResponseMessage::new(StatusCode::NO_CONTENT)
            }
            _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
        }
    }
}

impl Transport for InMemoryService {
    fn send(&self, request: RequestMessage) -> Result<ResponseMessage, TransportFailure> {
        let response = self.handle(&request);
        self.requests.lock().push(request);
        Ok(response)
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncTransport for InMemoryService {
    fn send_async(
        &self,
        request: RequestMessage,
    ) -> impl Future<Output = Result<ResponseMessage, TransportFailure>> + Send {
        let result = Transport::send(self, request);
        async move { result }
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "http://host/svc/";

    fn post(uri: &str, body: &str) -> RequestMessage {
        RequestMessage::new(Method::POST, uri)
            .with_header(names::CONTENT_TYPE, media_types::ATOM)
            .with_body(body.to_string())
    }

    #[test]
    fn insert_assigns_identity() {
        let service = InMemoryService::new(ROOT);
        let response = Transport::send(
            &service,
            post(
                "http://host/svc/Customers",
                r#"{"type":"Customer","properties":{"id":0,"name":"Ann"}}"#,
            ),
        )
        .unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.location(), Some("http://host/svc/Customers(1)"));
        assert!(service.contains("Customers(1)"));
    }

    #[test]
    fn update_checks_etag() {
        let service = InMemoryService::new(ROOT);
        let path = service.seed("Customers", "Customer", serde_json::json!({"id": 1, "name": "A"}));
        let update = |etag: &str| {
            RequestMessage::new(merge_method(), service.uri(&path))
                .with_header(names::IF_MATCH, etag)
                .with_body(r#"{"properties":{"name":"B"}}"#)
        };

        let stale = Transport::send(&service, update("W/\"9\"")).unwrap();
        assert_eq!(stale.status, StatusCode::PRECONDITION_FAILED);

        let ok = Transport::send(&service, update("W/\"1\"")).unwrap();
        assert_eq!(ok.status, StatusCode::NO_CONTENT);
        assert_eq!(ok.etag(), Some("W/\"2\""));
        assert_eq!(
            service.properties(&path),
            Some(serde_json::json!({"id": 1, "name": "B"}))
        );
    }

    #[test]
    fn tunneled_delete() {
        let service = InMemoryService::new(ROOT);
        let path = service.seed("Customers", "Customer", serde_json::json!({"id": 1}));
        let request = RequestMessage::new(Method::POST, service.uri(&path))
            .with_header(names::X_HTTP_METHOD, "DELETE");
        let response = Transport::send(&service, request).unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(service.entry_count(), 0);
    }

    #[test]
    fn links_add_and_remove() {
        let service = InMemoryService::new(ROOT);
        let customer = service.seed("Customers", "Customer", serde_json::json!({"id": 1}));
        let order = service.seed("Orders", "Order", serde_json::json!({"id": 2}));

        let add = RequestMessage::new(Method::POST, service.uri(&format!("{customer}/$links/Orders")))
            .with_body(format!(r#"{{"uri":"{}"}}"#, service.uri(&order)));
        assert_eq!(Transport::send(&service, add).unwrap().status, StatusCode::NO_CONTENT);
        assert_eq!(service.links(&customer, "Orders"), vec![order.clone()]);

        let delete = RequestMessage::new(
            Method::DELETE,
            service.uri(&format!("{customer}/$links/Orders(2)")),
        );
        assert_eq!(Transport::send(&service, delete).unwrap().status, StatusCode::NO_CONTENT);
        assert!(service.links(&customer, "Orders").is_empty());
    }

    #[test]
    fn configured_failure() {
        let service = InMemoryService::new(ROOT);
        service.fail_on("Customers", StatusCode::FORBIDDEN);
        let response = Transport::send(&service, post("http://host/svc/Customers", "{}")).unwrap();
        assert_eq!(response.status, StatusCode::FORBIDDEN);
        assert_eq!(service.request_count(), 1);
    }
}
