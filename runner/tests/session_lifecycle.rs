//! Lifecycle tests through the runner service: begin, suspend/resume,
//! timeouts, early exit and closed-session guards.
//!
//! Each test wires a `ServiceFixture` (in-memory store, results, deliveries
//! and a manual clock) and drives it the way consecutive client requests do.

use serde_json::json;

use qti_runner::core::types::{
    DeliveryState, Direction, DomainEvent, MoveOutcome, NavScope, NavigationMode,
    TestSessionState, TimeScope,
};
use qti_runner::error::RunnerError;
use qti_runner::io::config::RunnerConfig;
use qti_runner::io::storage::KeyValueStore;
use qti_runner::test_support::{
    COMPILATION_URI, EXECUTION_URI, ServiceFixture, TEST_URI, USER_URI, item, part, section,
    test_with,
};

fn linear_fixture() -> ServiceFixture {
    ServiceFixture::new(
        test_with(vec![part(
            "P1",
            NavigationMode::Linear,
            vec![section("S1", vec![item("I1"), item("I2")])],
        )]),
        RunnerConfig::default(),
    )
}

fn answer(value: &str) -> serde_json::Value {
    json!({ "RESPONSE": { "base": { "identifier": value } } })
}

#[test]
fn init_begins_session_and_persists_it() {
    let fixture = linear_fixture();
    let mut ctx = fixture.context();
    assert!(fixture.service.init(&mut ctx).expect("init"));
    assert_eq!(ctx.session().state(), TestSessionState::Interacting);
    assert_eq!(
        fixture.events.take(),
        vec![DomainEvent::SessionBegun {
            session_id: EXECUTION_URI.to_string()
        }]
    );
    drop(ctx);

    let ctx = fixture.context();
    assert_eq!(ctx.session().state(), TestSessionState::Interacting);
    assert_eq!(ctx.session().position(), 0);
    assert!(ctx.session().item_session(0).expect("item").presented);
}

/// Linear, individual submission, answered item: the responses reach the
/// result store before the cursor leaves the item.
#[test]
fn linear_next_transmits_before_advancing() {
    let fixture = linear_fixture();
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    fixture
        .service
        .store_item_response(&mut ctx, Some("I1"), &answer("A"))
        .expect("respond");
    assert_eq!(fixture.results.item_records("exec-1.I1.0").len(), 1);
    assert_eq!(ctx.session().position(), 0);

    let outcome = fixture
        .service
        .move_to(&mut ctx, Direction::Next, NavScope::Item, None)
        .expect("move");
    assert_eq!(outcome, MoveOutcome::Advanced);
    assert_eq!(ctx.session().position(), 1);
    assert!(ctx.session().item_session(0).expect("item").is_closed());
    assert!(fixture.events.take().contains(&DomainEvent::ContinueInteraction {
        session_id: EXECUTION_URI.to_string(),
        position: 1,
    }));
}

#[test]
fn response_for_another_item_is_rejected() {
    let fixture = linear_fixture();
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    let err = fixture
        .service
        .store_item_response(&mut ctx, Some("I2"), &answer("A"))
        .expect_err("not current");
    assert!(matches!(err, RunnerError::AttemptRejected { .. }));
    assert!(fixture.results.records().is_empty());
}

#[test]
fn pause_then_resume_keeps_cursor() {
    let fixture = linear_fixture();
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    fixture
        .service
        .move_to(&mut ctx, Direction::Next, NavScope::Item, None)
        .expect("move");

    fixture.service.pause(&mut ctx).expect("pause");
    assert!(fixture.service.is_paused(&ctx));
    fixture.service.resume(&mut ctx).expect("resume");

    assert_eq!(ctx.session().state(), TestSessionState::Interacting);
    assert_eq!(ctx.session().position(), 1);
}

#[test]
fn late_test_timeout_closes_session_and_finishes_delivery() {
    let fixture = linear_fixture();
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    fixture.events.take();

    fixture
        .service
        .timeout(&mut ctx, TimeScope::Test, "T1", true)
        .expect("timeout");

    assert!(fixture.service.is_terminated(&ctx));
    let events = fixture.events.take();
    let kinds: Vec<&str> = events
        .iter()
        .map(|event| match event {
            DomainEvent::SessionTimedOut { handled: false, .. } => "timed_out",
            DomainEvent::SessionTimedOut { handled: true, .. } => "timeout_handled",
            DomainEvent::SessionClosed { .. } => "closed",
            DomainEvent::DeliveryExecutionFinished { .. } => "finished",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, vec!["timed_out", "timeout_handled", "closed", "finished"]);
    assert_eq!(
        fixture
            .deliveries
            .record(EXECUTION_URI)
            .expect("record")
            .state,
        DeliveryState::Finished
    );
}

#[test]
fn closed_session_rejects_actions_and_keeps_route() {
    let fixture = linear_fixture();
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    assert!(fixture.service.exit_test(&mut ctx).expect("exit"));
    drop(ctx);

    let mut ctx = fixture.context();
    let position = ctx.session().position();
    let closed = |result: Result<bool, RunnerError>| {
        matches!(result, Err(RunnerError::SessionClosed { .. }))
    };
    assert!(matches!(
        fixture
            .service
            .move_to(&mut ctx, Direction::Next, NavScope::Item, None),
        Err(RunnerError::SessionClosed { .. })
    ));
    assert!(closed(fixture.service.pause(&mut ctx)));
    assert!(closed(fixture.service.resume(&mut ctx)));
    assert!(closed(
        fixture
            .service
            .store_item_response(&mut ctx, None, &answer("A"))
    ));
    assert_eq!(ctx.session().position(), position);
    assert_eq!(ctx.session().state(), TestSessionState::Closed);
}

#[test]
fn exit_by_non_owner_does_not_finish_delivery() {
    let fixture = linear_fixture();
    let mut ctx = fixture
        .service
        .get_service_context(TEST_URI, COMPILATION_URI, EXECUTION_URI, Some("intruder"))
        .expect("context");
    fixture.service.init(&mut ctx).expect("init");
    fixture.deliveries.push_event(EXECUTION_URI, "pending-warning");

    assert!(!fixture.service.exit_test(&mut ctx).expect("exit"));
    let record = fixture.deliveries.record(EXECUTION_URI).expect("record");
    assert_eq!(record.state, DeliveryState::Active);
    assert!(record.pending_events.is_empty());
    assert!(
        fixture
            .events
            .events()
            .iter()
            .any(|event| matches!(event, DomainEvent::DeliveryExecutionFinished { .. }))
    );
}

#[test]
fn exit_uses_configured_state() {
    let config = RunnerConfig {
        state_after_exit: DeliveryState::Terminated,
        ..RunnerConfig::default()
    };
    let fixture = ServiceFixture::new(
        test_with(vec![part(
            "P1",
            NavigationMode::Linear,
            vec![section("S1", vec![item("I1")])],
        )]),
        config,
    );
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    fixture.service.exit_test(&mut ctx).expect("exit");

    assert_eq!(
        fixture
            .deliveries
            .record(EXECUTION_URI)
            .expect("record")
            .state,
        DeliveryState::Terminated
    );
    assert!(
        fixture
            .events
            .events()
            .iter()
            .any(|event| matches!(event, DomainEvent::SessionExited { .. }))
    );
}

#[test]
fn context_from_another_runner_is_rejected() {
    let first = linear_fixture();
    let second = linear_fixture();
    let mut ctx = first.context();

    let err = second.service.init(&mut ctx).expect_err("foreign context");
    assert!(matches!(err, RunnerError::ContextTypeMismatch { .. }));
}

#[test]
fn delete_execution_data_is_prefix_safe() {
    let fixture = linear_fixture();
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    fixture
        .service
        .set_item_state(&ctx, "I1", Some(&json!({"RESPONSE": {"response": null}})))
        .expect("item state");
    fixture
        .service
        .switch_client_store_id(&ctx, "client-1")
        .expect("client store");
    drop(ctx);

    let other = fixture
        .service
        .get_service_context(TEST_URI, COMPILATION_URI, "exec-10", Some(USER_URI))
        .expect("other context");
    fixture
        .service
        .set_item_state(&other, "I1", Some(&json!({"kept": true})))
        .expect("other item state");
    drop(other);

    assert!(
        fixture
            .service
            .delete_delivery_execution_data(EXECUTION_URI)
            .expect("delete")
    );

    let remaining = fixture.store.keys("runner:*").expect("keys");
    assert_eq!(remaining, vec!["runner:item-state:user-1:exec-10:I1".to_string()]);
}
