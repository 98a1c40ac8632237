//! Item state, tool state and compiled item data through the runner service.

use std::collections::BTreeMap;

use serde_json::json;

use qti_runner::core::types::{Direction, NavScope, NavigationMode, TestSessionState};
use qti_runner::core::value::{BaseType, Cardinality, Scalar, Value};
use qti_runner::definition::VariableDeclaration;
use qti_runner::error::RunnerError;
use qti_runner::io::config::RunnerConfig;
use qti_runner::test_support::{
    COMPILATION_URI, EXECUTION_URI, ServiceFixture, TEST_URI, item, part, section, test_with,
};

fn fixture_with(config: RunnerConfig) -> ServiceFixture {
    ServiceFixture::new(
        test_with(vec![part(
            "P1",
            NavigationMode::Nonlinear,
            vec![section("S1", vec![item("I1"), item("I2")])],
        )]),
        config,
    )
}

#[test]
fn item_state_round_trips_and_missing_is_none() {
    let fixture = fixture_with(RunnerConfig::default());
    let ctx = fixture.context();
    let blob = json!({
        "RESPONSE": { "response": { "base": { "identifier": "A" } } },
        "notes": { "response": { "base": null }, "extra": [1, 2] }
    });

    assert!(fixture.service.set_item_state(&ctx, "I1", Some(&blob)).expect("set"));
    assert_eq!(fixture.service.get_item_state(&ctx, "I1").expect("get"), Some(blob));
    assert_eq!(fixture.service.get_item_state(&ctx, "I2").expect("get"), None);
}

#[test]
fn item_state_needs_a_user() {
    let fixture = fixture_with(RunnerConfig::default());
    let ctx = fixture
        .service
        .get_service_context(TEST_URI, COMPILATION_URI, EXECUTION_URI, None)
        .expect("anonymous context");

    assert!(!fixture.service.set_item_state(&ctx, "I1", Some(&json!({}))).expect("set"));
    assert_eq!(fixture.service.get_item_state(&ctx, "I1").expect("get"), None);
}

#[test]
fn tool_states_merge_and_report_configured_tools() {
    let fixture = fixture_with(RunnerConfig {
        tools: vec!["calculator".to_string(), "ruler".to_string()],
        ..RunnerConfig::default()
    });
    let ctx = fixture.context();

    let mut first = BTreeMap::new();
    first.insert("calculator".to_string(), json!({"memory": 3}));
    assert!(fixture.service.set_tools_states(&ctx, &first).expect("set"));
    let mut second = BTreeMap::new();
    second.insert("highlighter".to_string(), json!(["p1"]));
    fixture.service.set_tools_states(&ctx, &second).expect("set");

    let states = fixture.service.get_tools_states(&ctx).expect("get");
    assert_eq!(states.get("calculator"), Some(&Some(json!({"memory": 3}))));
    assert_eq!(states.get("highlighter"), Some(&Some(json!(["p1"]))));
    assert_eq!(states.get("ruler"), Some(&None));
}

#[test]
fn tool_states_are_skipped_without_server_storage() {
    let fixture = fixture_with(RunnerConfig {
        tools: vec!["calculator".to_string()],
        tool_state_server_storage: false,
        ..RunnerConfig::default()
    });
    let ctx = fixture.context();
    let mut states = BTreeMap::new();
    states.insert("calculator".to_string(), json!({}));

    assert!(!fixture.service.set_tools_states(&ctx, &states).expect("set"));
    assert!(fixture.service.get_tools_states(&ctx).expect("get").is_empty());
}

#[test]
fn item_data_falls_back_to_default_language_and_is_cached() {
    let fixture = fixture_with(RunnerConfig::default());
    fixture
        .compilation
        .add_file("priv", "en-US/item.json", r#"{"body": "en", "feedbacks": []}"#);
    fixture
        .compilation
        .add_file("priv", "fr-FR/item.json", r#"{"body": "fr", "feedbacks": []}"#);
    let mut ctx = fixture.context();

    let data = fixture.service.get_item_data(&mut ctx, "I1").expect("data");
    assert_eq!(data["body"], "en");

    ctx.set_language(Some("fr-FR"));
    let data = fixture.service.get_item_data(&mut ctx, "I1").expect("data");
    assert_eq!(data["body"], "fr");

    ctx.set_language(Some("de-DE"));
    let data = fixture.service.get_item_data(&mut ctx, "I1").expect("data");
    assert_eq!(data["body"], "en");
}

#[test]
fn missing_element_files_degrade_to_empty_objects() {
    let fixture = fixture_with(RunnerConfig::default());
    let mut ctx = fixture.context();

    assert!(matches!(
        fixture.service.get_item_data(&mut ctx, "I1"),
        Err(RunnerError::FileNotFound { .. })
    ));
    for elements in [
        fixture.service.get_item_variable_elements(&mut ctx, "I1"),
        fixture.service.get_item_metadata_elements(&mut ctx, "I1"),
        fixture.service.get_item_portable_elements(&mut ctx, "I1"),
    ] {
        assert_eq!(elements.expect("elements"), json!({}));
    }
}

#[test]
fn malformed_href_is_inconsistent_data() {
    let mut broken = item("I1");
    broken.href = "uri-only|pub".to_string();
    let fixture = ServiceFixture::new(
        test_with(vec![part(
            "P1",
            NavigationMode::Linear,
            vec![section("S1", vec![broken])],
        )]),
        RunnerConfig::default(),
    );
    let mut ctx = fixture.context();

    assert!(matches!(
        fixture.service.get_item_data(&mut ctx, "I1"),
        Err(RunnerError::InconsistentData(_))
    ));
}

#[test]
fn feedbacks_reported_only_when_displayed() {
    let fixture = fixture_with(RunnerConfig::default());
    fixture
        .compilation
        .add_file("priv", "en-US/item.json", r#"{"feedbacks": [{"id": "F1"}]}"#);
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    assert!(!fixture.service.has_feedbacks(&mut ctx, "I1").expect("hidden"));
    drop(ctx);

    let forced = fixture_with(RunnerConfig {
        force_display_feedback: true,
        ..RunnerConfig::default()
    });
    forced
        .compilation
        .add_file("priv", "en-US/item.json", r#"{"feedbacks": [{"id": "F1"}]}"#);
    let mut ctx = forced.context();
    forced.service.init(&mut ctx).expect("init");
    assert!(forced.service.has_feedbacks(&mut ctx, "I1").expect("shown"));
    assert!(forced.service.get_test_context(&mut ctx).expect("context").has_feedbacks);

    forced
        .service
        .store_item_response(
            &mut ctx,
            None,
            &json!({ "RESPONSE": { "base": { "identifier": "A" } } }),
        )
        .expect("respond");
    assert_eq!(ctx.session().state(), TestSessionState::ModalFeedback);
    forced
        .service
        .move_to(&mut ctx, Direction::Next, NavScope::Item, None)
        .expect("next");
    assert_eq!(ctx.session().state(), TestSessionState::Interacting);
}

/// Two response variables with declared defaults: partial judgment needs one
/// to differ, full judgment needs both.
#[test]
fn completion_judgment_against_defaults() {
    let declaration = |identifier: &str, default: &str| VariableDeclaration {
        identifier: identifier.to_string(),
        cardinality: Cardinality::Single,
        base_type: BaseType::Identifier,
        default_value: Some(Value::Single(Scalar::Identifier(default.to_string()))),
        correct_response: None,
    };
    let mut two = item("I1");
    two.response_declarations = vec![declaration("R1", "X"), declaration("R2", "Y")];
    let fixture = ServiceFixture::new(
        test_with(vec![part(
            "P1",
            NavigationMode::Nonlinear,
            vec![section("S1", vec![two])],
        )]),
        RunnerConfig::default(),
    );
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");
    let payload = |r1: &str, r2: &str| {
        json!({
            "R1": { "base": { "identifier": r1 } },
            "R2": { "base": { "identifier": r2 } }
        })
    };

    fixture
        .service
        .store_item_response(&mut ctx, None, &payload("X", "Y"))
        .expect("defaults");
    assert!(!fixture.service.is_item_completed(&ctx, 0, true).expect("partial"));
    assert!(
        fixture
            .service
            .empty_response(&ctx, &payload("X", "Y"))
            .expect("empty")
    );

    fixture
        .service
        .store_item_response(&mut ctx, None, &payload("Z", "Y"))
        .expect("one differs");
    assert!(fixture.service.is_item_completed(&ctx, 0, true).expect("partial"));
    assert!(!fixture.service.is_item_completed(&ctx, 0, false).expect("full"));

    fixture
        .service
        .store_item_response(&mut ctx, None, &payload("Z", "W"))
        .expect("both differ");
    assert!(fixture.service.is_item_completed(&ctx, 0, false).expect("full"));
}

#[test]
fn variables_attach_to_current_item_transmission() {
    let fixture = fixture_with(RunnerConfig::default());
    let mut ctx = fixture.context();
    fixture.service.init(&mut ctx).expect("init");

    fixture
        .service
        .store_trace_variable(&ctx, Some("I1"), "clicks", &json!(4))
        .expect("trace");
    fixture.service.comment(&ctx, "unclear wording").expect("comment");
    fixture
        .service
        .store_outcome_variable(&ctx, None, "TEST_NOTE", &json!({"a": 1}))
        .expect("test outcome");

    let item_records = fixture.results.item_records("exec-1.I1.0");
    assert_eq!(item_records.len(), 2);
    assert_eq!(item_records[1].variables[0].identifier, "comment");

    let err = fixture
        .service
        .store_trace_variable(&ctx, Some("I2"), "clicks", &json!(1))
        .expect_err("not current");
    assert!(matches!(err, RunnerError::NotImplemented(_)));
}
