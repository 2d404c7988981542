//! Queries, materialization and stream reads against the in-memory service.

use http::StatusCode;
use odata_client::{ClientError, SaveChangesOptions};
use odata_protocol::ProtocolError;
use odata_testkit::prelude::*;
use odata_tracking::SaveStream;
use std::sync::Arc;

fn shared_context(
    service: &Arc<InMemoryService>,
    merge_option: MergeOption,
) -> DataServiceContext<InMemoryService> {
    DataServiceContext::new(
        settings().with_merge_option(merge_option),
        Arc::new(sample_model()),
        service.clone(),
        Arc::new(JsonSerializer::new()),
    )
    .expect("Failed to create context")
}

fn entities(response: QueryResponse) -> Vec<EntityRef> {
    match response {
        QueryResponse::Entities(entities) => entities,
        QueryResponse::Raw(raw) => panic!("expected entities, got {raw:?}"),
    }
}

fn feed() -> QueryShape {
    QueryShape::new(PayloadKind::Feed)
}

/// Seeds one customer and returns the service with its path.
fn seeded() -> (Arc<InMemoryService>, String) {
    let service = Arc::new(InMemoryService::new(SERVICE_ROOT));
    let path = service.seed("Customers", "Customer", serde_json::json!({"id": 1, "name": "Ann"}));
    (service, path)
}

/// Bumps the server version of the first customer through a second client.
fn update_elsewhere(service: &Arc<InMemoryService>) {
    let mut other = shared_context(service, MergeOption::AppendOnly);
    let found = entities(other.execute("Customers", feed()).unwrap());
    other.update_object(&found[0]).unwrap();
    other.save_changes(SaveChangesOptions::NONE).unwrap();
}

#[test]
fn query_attaches_results() {
    let (service, path) = seeded();
    service.seed("Customers", "Customer", serde_json::json!({"id": 2, "name": "Bob"}));
    let mut ctx = shared_context(&service, MergeOption::AppendOnly);

    let found = entities(ctx.execute("Customers", feed()).unwrap());
    assert_eq!(found.len(), 2);
    assert_eq!(
        found[0].downcast_ref::<Customer>(),
        Some(&Customer::new(1, "Ann"))
    );

    let descriptor = ctx.get_entity_descriptor(&found[0]).unwrap();
    assert_eq!(descriptor.state(), EntityState::Unchanged);
    assert_eq!(descriptor.identity(), Some(service.uri(&path).as_str()));
    assert_eq!(descriptor.entity_set(), Some("Customers"));
    assert_eq!(descriptor.etag(), Some("W/\"1\""));
    assert!(!ctx.has_pending_changes());
}

#[test]
fn repeated_query_returns_the_tracked_object() {
    let (service, _) = seeded();
    let mut ctx = shared_context(&service, MergeOption::AppendOnly);

    let first = entities(ctx.execute("Customers", feed()).unwrap());
    let second = entities(ctx.execute("Customers", feed()).unwrap());
    assert!(first[0].same_as(&second[0]));
    assert_eq!(ctx.entities().len(), 1);
}

#[test]
fn append_only_keeps_tracked_metadata() {
    let (service, _) = seeded();
    let mut ctx = shared_context(&service, MergeOption::AppendOnly);
    let found = entities(ctx.execute("Customers", feed()).unwrap());

    update_elsewhere(&service);
    ctx.execute("Customers", feed()).unwrap();
    assert_eq!(ctx.get_entity_descriptor(&found[0]).unwrap().etag(), Some("W/\"1\""));
}

#[test]
fn overwrite_changes_discards_local_state() {
    let (service, _) = seeded();
    let mut ctx = shared_context(&service, MergeOption::OverwriteChanges);
    let found = entities(ctx.execute("Customers", feed()).unwrap());
    ctx.update_object(&found[0]).unwrap();

    update_elsewhere(&service);
    ctx.execute("Customers", feed()).unwrap();
    let descriptor = ctx.get_entity_descriptor(&found[0]).unwrap();
    assert_eq!(descriptor.etag(), Some("W/\"2\""));
    assert_eq!(descriptor.state(), EntityState::Unchanged);
}

#[test]
fn preserve_changes_keeps_modified_entities() {
    let (service, _) = seeded();
    service.seed("Customers", "Customer", serde_json::json!({"id": 2, "name": "Bob"}));
    let mut ctx = shared_context(&service, MergeOption::PreserveChanges);
    let found = entities(ctx.execute("Customers", feed()).unwrap());
    ctx.update_object(&found[0]).unwrap();

    // bump both entries on the server
    let mut other = shared_context(&service, MergeOption::AppendOnly);
    for entity in entities(other.execute("Customers", feed()).unwrap()) {
        other.update_object(&entity).unwrap();
    }
    other.save_changes(SaveChangesOptions::NONE).unwrap();

    ctx.execute("Customers", feed()).unwrap();
    let modified = ctx.get_entity_descriptor(&found[0]).unwrap();
    assert_eq!(modified.state(), EntityState::Modified);
    assert_eq!(modified.etag(), Some("W/\"1\""));
    let unchanged = ctx.get_entity_descriptor(&found[1]).unwrap();
    assert_eq!(unchanged.etag(), Some("W/\"2\""));

    // the preserved update is rejected by the server's newer token
    let err = ctx.save_changes(SaveChangesOptions::NONE).unwrap_err();
    let ClientError::SaveFailed(result) = err else {
        panic!("expected SaveFailed, got {err:?}");
    };
    assert_eq!(result.responses[0].status, Some(StatusCode::PRECONDITION_FAILED));
}

#[test]
fn no_tracking_leaves_the_tracker_alone() {
    let (service, _) = seeded();
    let mut ctx = shared_context(&service, MergeOption::NoTracking);

    let found = entities(ctx.execute("Customers", feed()).unwrap());
    assert_eq!(found.len(), 1);
    assert!(ctx.get_entity_descriptor(&found[0]).is_none());
    assert!(ctx.entities().is_empty());
}

#[test]
fn derived_types_are_materialized() {
    let service = Arc::new(InMemoryService::new(SERVICE_ROOT));
    service.seed(
        "Customers",
        "PreferredCustomer",
        serde_json::json!({"id": 1, "name": "Ann", "discount": 10}),
    );
    let mut ctx = shared_context(&service, MergeOption::AppendOnly);

    let found = entities(ctx.execute("Customers", feed()).unwrap());
    let customer = found[0].downcast_ref::<PreferredCustomer>().unwrap();
    assert_eq!(customer.discount, 10);
    assert_eq!(
        ctx.get_entity_descriptor(&found[0]).unwrap().server_type_name(),
        Some("PreferredCustomer")
    );
}

#[test]
fn navigation_query_after_related_insert() {
    let mut ctx = service_context();
    let ann = EntityRef::new(Customer::new(0, "Ann"));
    let order = EntityRef::new(Order::new(0, 75));
    ctx.add_object("Customers", ann.clone()).unwrap();
    ctx.add_related_object(&ann, "Orders", order.clone()).unwrap();
    ctx.save_changes(SaveChangesOptions::NONE).unwrap();

    let found = entities(ctx.execute("Customers(1)/Orders", feed()).unwrap());
    assert_eq!(found.len(), 1);
    assert!(found[0].same_as(&order));
}

#[test]
fn failed_query_reports_the_status() {
    let mut ctx = service_context();
    let err = ctx
        .execute("Customers(99)", QueryShape::new(PayloadKind::Entry))
        .unwrap_err();
    match err {
        ClientError::RequestFailed { status, message } => {
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(message, "no such entity");
        }
        other => panic!("expected RequestFailed, got {other:?}"),
    }
}

#[test]
fn query_features_are_checked_against_the_ceiling() {
    let mut ctx = service_context_with(settings().with_max_protocol_version(ProtocolVersion::V1));
    for query in [feed().with_select(), feed().with_count(), feed().with_continuation()] {
        let err = ctx.execute("Customers", query).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Protocol(ProtocolError::VersionExceedsCeiling { .. })
        ));
    }
    assert_eq!(ctx.transport().request_count(), 0);

    let mut ctx = service_context_with(settings().with_max_protocol_version(ProtocolVersion::V2));
    ctx.execute("Customers", feed().with_select()).unwrap();
    let request = &ctx.transport().requests()[0];
    assert_eq!(request.header(names::DATA_SERVICE_VERSION), Some("2.0;NetFx"));
}

#[test]
fn default_stream_read() {
    let mut ctx = service_context();
    let photo = EntityRef::new(Photo::new(0, "sunset"));
    ctx.add_object("Photos", photo.clone()).unwrap();
    ctx.set_save_stream(&photo, SaveStream::new("image/jpeg", vec![0xffu8, 0xd8]))
        .unwrap();
    ctx.save_changes(SaveChangesOptions::NONE).unwrap();

    let response = ctx.get_read_stream(&photo, None).unwrap();
    assert_eq!(response.header(names::CONTENT_TYPE), Some("image/jpeg"));
    assert_eq!(&response.body[..], &[0xffu8, 0xd8]);
    assert_eq!(
        ctx.transport().requests().last().unwrap().uri,
        "http://host/svc/Photos(1)/$value"
    );
}

#[test]
fn missing_stream_is_a_failed_request() {
    let mut ctx = service_context();
    let photo = EntityRef::new(Photo::new(0, "x"));
    ctx.add_object("Photos", photo.clone()).unwrap();
    ctx.set_save_stream(&photo, SaveStream::new("image/png", vec![1u8]))
        .unwrap();
    ctx.save_changes(SaveChangesOptions::NONE).unwrap();

    let err = ctx.get_read_stream(&photo, Some("Thumbnail")).unwrap_err();
    assert!(matches!(
        err,
        ClientError::RequestFailed { status: StatusCode::NOT_FOUND, .. }
    ));
}

#[tokio::test]
async fn async_query_and_stream() {
    let (service, _) = seeded();
    let mut ctx = shared_context(&service, MergeOption::AppendOnly);

    let found = match ctx.execute_async("Customers", feed()).await.unwrap() {
        QueryResponse::Entities(entities) => entities,
        QueryResponse::Raw(raw) => panic!("expected entities, got {raw:?}"),
    };
    assert_eq!(found.len(), 1);

    let err = ctx.get_read_stream_async(&found[0], None).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::RequestFailed { status: StatusCode::NOT_FOUND, .. }
    ));
}
