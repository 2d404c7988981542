//! Request pipeline events seen from a full client.

use http::StatusCode;
use odata_client::{ClientError, SaveChangesOptions, SendingRequestHook, TransportFailure};
use odata_testkit::prelude::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let c = Arc::new(AtomicUsize::new(0));
    (c.clone(), c)
}

fn add_customers(ctx: &mut DataServiceContext<MockTransport>, names: &[&str]) {
    for name in names {
        ctx.add_object("Customers", EntityRef::new(Customer::new(0, name)))
            .unwrap();
    }
}

#[test]
fn building_handler_rewrites_headers() {
    let mut ctx = service_context();
    ctx.events_mut().on_building_request(|args| {
        args.headers.set("X-Correlation", "42");
    });
    ctx.add_object("Customers", EntityRef::new(Customer::new(0, "Ann")))
        .unwrap();
    ctx.save_changes(SaveChangesOptions::NONE).unwrap();

    let request = &ctx.transport().requests()[0];
    assert_eq!(request.header("x-correlation"), Some("42"));
}

#[test]
fn legacy_and_modern_handlers_exclude_each_other() {
    let mut ctx = mock_context();
    ctx.events_mut().on_sending_request(|_| {}).unwrap();
    let err = ctx.events_mut().on_sending_request2(|_| {}).unwrap_err();
    assert!(matches!(err, ClientError::EventConflict { .. }));
    assert!(err.is_local());

    let mut ctx = mock_context();
    ctx.events_mut().on_sending_request2(|_| {}).unwrap();
    assert!(ctx.events_mut().on_sending_request(|_| {}).is_err());
    assert!(matches!(
        ctx.events_mut().sending_hook(),
        SendingRequestHook::Modern(handlers) if handlers.len() == 1
    ));
}

#[test]
fn legacy_handler_sees_only_the_envelope() {
    let mut ctx = mock_context();
    let (calls, c) = counter();
    ctx.events_mut()
        .on_sending_request(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    add_customers(&mut ctx, &["Ann", "Bob"]);
    ctx.transport().push_response(
        BatchResponseBuilder::new()
            .changeset(vec![
                created("http://host/svc/Customers(1)"),
                created("http://host/svc/Customers(2)"),
            ])
            .build(),
    );

    ctx.save_changes(SaveChangesOptions::BATCH).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn modern_handler_sees_parts_and_envelope() {
    let mut ctx = mock_context();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    ctx.events_mut()
        .on_sending_request2(move |args| {
            s.lock().push((args.is_batch_part(), args.descriptor().is_some()));
            if args.is_batch_part() {
                args.request.headers.set("X-Part", "yes");
            }
        })
        .unwrap();
    add_customers(&mut ctx, &["Ann", "Bob"]);
    ctx.transport().push_response(
        BatchResponseBuilder::new()
            .changeset(vec![
                created("http://host/svc/Customers(1)"),
                created("http://host/svc/Customers(2)"),
            ])
            .build(),
    );

    ctx.save_changes(SaveChangesOptions::BATCH).unwrap();
    assert_eq!(
        *seen.lock(),
        vec![(true, true), (true, true), (false, false)]
    );
    let body = String::from_utf8_lossy(&ctx.transport().requests()[0].body).into_owned();
    assert_eq!(body.matches("X-Part: yes").count(), 2);
}

#[test]
fn receiving_fires_per_batch_part() {
    let mut ctx = mock_context();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    ctx.events_mut().on_receiving_response(move |args| {
        s.lock()
            .push((args.response.map(|r| r.status), args.is_batch_part));
    });
    add_customers(&mut ctx, &["Ann", "Bob"]);
    ctx.transport().push_response(
        BatchResponseBuilder::new()
            .changeset(vec![
                created("http://host/svc/Customers(1)"),
                created("http://host/svc/Customers(2)"),
            ])
            .build(),
    );

    ctx.save_changes(SaveChangesOptions::BATCH).unwrap();
    assert_eq!(
        *seen.lock(),
        vec![
            (Some(StatusCode::ACCEPTED), false),
            (Some(StatusCode::CREATED), true),
            (Some(StatusCode::CREATED), true),
        ]
    );
}

#[test]
fn receiving_fires_on_transport_failure() {
    let mut ctx = mock_context();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    ctx.events_mut().on_receiving_response(move |args| {
        s.lock()
            .push((args.response.is_some(), args.descriptor.is_some()));
    });
    add_customers(&mut ctx, &["Ann"]);
    ctx.transport()
        .push_failure(TransportFailure::new("connection reset"));

    let err = ctx.save_changes(SaveChangesOptions::NONE).unwrap_err();
    let ClientError::SaveFailed(result) = err else {
        panic!("expected SaveFailed, got {err:?}");
    };
    assert_eq!(result.responses[0].status, None);
    assert_eq!(result.responses[0].error.as_deref(), Some("connection reset"));
    assert_eq!(*seen.lock(), vec![(false, true)]);
}

#[test]
fn receiving_sees_the_partial_response_of_a_failure() {
    let mut ctx = mock_context();
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let s = statuses.clone();
    ctx.events_mut().on_receiving_response(move |args| {
        s.lock().push(args.response.map(|r| r.status));
    });
    add_customers(&mut ctx, &["Ann"]);
    ctx.transport().push_failure(
        TransportFailure::new("body truncated")
            .with_response(error_response(StatusCode::BAD_GATEWAY, "")),
    );

    let err = ctx.save_changes(SaveChangesOptions::NONE).unwrap_err();
    let ClientError::SaveFailed(result) = err else {
        panic!("expected SaveFailed, got {err:?}");
    };
    assert_eq!(result.responses[0].status, Some(StatusCode::BAD_GATEWAY));
    assert_eq!(*statuses.lock(), vec![Some(StatusCode::BAD_GATEWAY)]);
}

#[test]
fn cancel_from_a_handler_stops_the_save() {
    let mut ctx = service_context();
    let handle = ctx.cancel_handle();
    ctx.events_mut().on_receiving_response(move |_| handle.cancel());
    ctx.add_object("Customers", EntityRef::new(Customer::new(0, "Ann")))
        .unwrap();
    ctx.add_object("Customers", EntityRef::new(Customer::new(0, "Bob")))
        .unwrap();

    let err = ctx.save_changes(SaveChangesOptions::NONE).unwrap_err();
    assert!(matches!(err, ClientError::Cancelled));
    assert!(!err.is_local());
    assert_eq!(ctx.transport().request_count(), 1);
    assert_eq!(ctx.transport().abort_count(), 1);

    // the flag is cleared by the next operation
    let result = ctx.save_changes(SaveChangesOptions::NONE).unwrap();
    assert_eq!(result.responses.len(), 1);
    assert_eq!(ctx.transport().request_count(), 2);
    assert!(!ctx.has_pending_changes());
}
