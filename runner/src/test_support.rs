//! Test-only builders for definitions, sessions and a wired runner service.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::adaptive::SequentialSelector;
use crate::core::types::{NavigationMode, SubmissionMode};
use crate::core::value::{BaseType, Cardinality, Scalar, Value, Variable, VariableKind};
use crate::definition::{
    AdaptiveSettings, AssessmentTest, ItemRef, ItemSessionControl, Section, TestPart,
    VariableDeclaration, sample_test,
};
use crate::io::clock::ManualClock;
use crate::io::compilation::MemoryCompilation;
use crate::io::config::RunnerConfig;
use crate::io::delivery::MemoryDeliveryExecutions;
use crate::io::events::RecordingEventSink;
use crate::io::results::MemoryResultStore;
use crate::io::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::scoring::{MatchCorrect, SCORE};
use crate::service::{RunnerDeps, RunnerService};

/// 2024-01-01 09:00:00 UTC.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Item with one single-cardinality identifier `RESPONSE`.
pub fn item(id: &str) -> ItemRef {
    ItemRef {
        identifier: id.to_string(),
        href: format!("uri-{id}|pub|priv"),
        time_limits: None,
        response_declarations: vec![VariableDeclaration {
            identifier: "RESPONSE".to_string(),
            cardinality: Cardinality::Single,
            base_type: BaseType::Identifier,
            default_value: None,
            correct_response: None,
        }],
        outcome_declarations: Vec::new(),
        item_session_control: None,
        external_scored: false,
        occurrences: 1,
    }
}

/// [`item`] whose correct response is `correct`, with a `SCORE` outcome and
/// its own private directory.
pub fn keyed_item(id: &str, correct: &str) -> ItemRef {
    let mut item = item(id);
    item.href = format!("uri-{id}|pub-{id}|priv-{id}");
    item.response_declarations[0].correct_response =
        Some(Value::Single(Scalar::Identifier(correct.to_string())));
    item.outcome_declarations.push(VariableDeclaration {
        identifier: SCORE.to_string(),
        cardinality: Cardinality::Single,
        base_type: BaseType::Float,
        default_value: Some(Value::Single(Scalar::Float(0.0))),
        correct_response: None,
    });
    item
}

pub fn section(id: &str, items: Vec<ItemRef>) -> Section {
    Section {
        identifier: id.to_string(),
        title: format!("{id} title"),
        visible: true,
        time_limits: None,
        rubric_blocks: Vec::new(),
        adaptive: None,
        item_refs: items,
    }
}

pub fn adaptive_section(id: &str, items: Vec<ItemRef>) -> Section {
    Section {
        adaptive: Some(AdaptiveSettings::default()),
        ..section(id, items)
    }
}

pub fn part(id: &str, mode: NavigationMode, sections: Vec<Section>) -> TestPart {
    part_with_submission(id, mode, SubmissionMode::Individual, sections)
}

pub fn part_with_submission(
    id: &str,
    mode: NavigationMode,
    submission: SubmissionMode,
    sections: Vec<Section>,
) -> TestPart {
    TestPart {
        identifier: id.to_string(),
        navigation_mode: mode,
        submission_mode: submission,
        time_limits: None,
        item_session_control: ItemSessionControl::default(),
        sections,
    }
}

pub fn test_with(parts: Vec<TestPart>) -> AssessmentTest {
    AssessmentTest {
        identifier: "T1".to_string(),
        title: "Test title".to_string(),
        time_limits: None,
        outcome_declarations: Vec::new(),
        test_parts: parts,
    }
}

pub fn identifier_response(id: &str, value: &str) -> Variable {
    Variable {
        identifier: id.to_string(),
        kind: VariableKind::Response,
        cardinality: Cardinality::Single,
        base_type: BaseType::Identifier,
        value: Some(Value::Single(Scalar::Identifier(value.to_string()))),
        default: None,
    }
}

pub fn sample_session_test() -> Arc<AssessmentTest> {
    Arc::new(sample_test())
}

/// File-backed store inside a fresh temporary directory.
pub fn temp_file_store() -> (tempfile::TempDir, FileStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileStore::open(&dir.path().join("store.json")).expect("open store");
    (dir, store)
}

pub const TEST_URI: &str = "test-def";
pub const COMPILATION_URI: &str = "test-comp";
pub const EXECUTION_URI: &str = "exec-1";
pub const USER_URI: &str = "user-1";

/// Runner service over in-memory collaborators with a manual clock.
pub struct ServiceFixture {
    pub service: RunnerService,
    pub store: Arc<MemoryStore>,
    pub compilation: Arc<MemoryCompilation>,
    pub results: Arc<MemoryResultStore>,
    pub deliveries: Arc<MemoryDeliveryExecutions>,
    pub events: Arc<RecordingEventSink>,
    pub clock: Arc<ManualClock>,
}

impl ServiceFixture {
    /// Register `test` under [`TEST_URI`] and [`EXECUTION_URI`] owned by [`USER_URI`].
    pub fn new(test: AssessmentTest, config: RunnerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let compilation = Arc::new(MemoryCompilation::new());
        let results = Arc::new(MemoryResultStore::new());
        let deliveries = Arc::new(MemoryDeliveryExecutions::new());
        let events = Arc::new(RecordingEventSink::new());
        let clock = Arc::new(ManualClock::new(t0()));
        compilation.add_test(TEST_URI, test);
        deliveries.register(EXECUTION_URI, Some(USER_URI));
        let service = RunnerService::new(RunnerDeps {
            config,
            store: Arc::clone(&store) as Arc<dyn KeyValueStore>,
            compilation: compilation.clone(),
            results: results.clone(),
            deliveries: deliveries.clone(),
            events: events.clone(),
            scoring: Arc::new(MatchCorrect),
            selector: Arc::new(SequentialSelector),
            clock: clock.clone(),
        });
        Self {
            service,
            store,
            compilation,
            results,
            deliveries,
            events,
            clock,
        }
    }

    pub fn context(&self) -> crate::context::ServiceContext {
        self.service
            .get_service_context(TEST_URI, COMPILATION_URI, EXECUTION_URI, Some(USER_URI))
            .expect("service context")
    }
}
