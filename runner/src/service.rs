//! Runner service: every candidate action as one synchronous call.
//!
//! Collaborators are injected once through [`RunnerDeps`]. Each operation
//! takes the [`ServiceContext`] returned by
//! [`RunnerService::get_service_context`] and runs in a fixed order:
//! navigation, response processing (transmission), event delivery, and
//! persistence last.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as Json};
use tracing::{debug, info, instrument, warn};

use crate::adaptive::{AdaptiveItemSelector, ItemResult};
use crate::context::{ContextUris, ExecutionLocks, ServiceContext, next_runner_id};
use crate::core::item::ItemSession;
use crate::core::response::{is_empty_response, parse_responses, payload_from_item_state};
use crate::core::timing::Overflow;
use crate::core::types::{
    DeliveryState, Direction, DomainEvent, MoveOutcome, NavScope, TestSessionState, TimeScope,
};
use crate::core::value::{Variable, VariableKind};
use crate::definition::{ItemRef, TimeLimits};
use crate::error::{Result, RunnerError};
use crate::io::clock::Clock;
use crate::io::compilation::{
    CompilationStore, ITEM_DATA_FILE, ItemHref, METADATA_ELEMENTS_FILE, PORTABLE_ELEMENTS_FILE,
    VARIABLE_ELEMENTS_FILE, read_item_file,
};
use crate::io::config::RunnerConfig;
use crate::io::delivery::DeliveryExecutions;
use crate::io::events::EventSink;
use crate::io::results::ResultStore;
use crate::io::session_store::SessionStore;
use crate::io::state_store::{StateStore, ToolStates};
use crate::io::storage::KeyValueStore;
use crate::scoring::{ItemScoring, SCORE};
use crate::session::{AssessmentSession, ItemSubmission, TestSession};
use crate::views::{self, ContextInputs, TestContext, TestMap};

/// Collaborators of the runner.
pub struct RunnerDeps {
    pub config: RunnerConfig,
    pub store: Arc<dyn KeyValueStore>,
    pub compilation: Arc<dyn CompilationStore>,
    pub results: Arc<dyn ResultStore>,
    pub deliveries: Arc<dyn DeliveryExecutions>,
    pub events: Arc<dyn EventSink>,
    pub scoring: Arc<dyn ItemScoring>,
    pub selector: Arc<dyn AdaptiveItemSelector>,
    pub clock: Arc<dyn Clock>,
}

/// Current item variables with the answered judgment.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSessionView {
    pub item: String,
    pub variables: Vec<Variable>,
    pub answered: bool,
}

pub struct RunnerService {
    runner_id: u64,
    deps: RunnerDeps,
    sessions: SessionStore,
    states: StateStore,
    locks: ExecutionLocks,
}

impl RunnerService {
    pub fn new(deps: RunnerDeps) -> Self {
        let sessions = SessionStore::new(Arc::clone(&deps.store));
        let states = StateStore::new(Arc::clone(&deps.store));
        Self {
            runner_id: next_runner_id(),
            deps,
            sessions,
            states,
            locks: ExecutionLocks::new(),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.deps.config
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// Load (or create) the session of an execution and lock the execution
    /// until the returned context is dropped.
    #[instrument(skip_all, fields(execution = %execution_uri))]
    pub fn get_service_context(
        &self,
        test_definition_uri: &str,
        test_compilation_uri: &str,
        execution_uri: &str,
        user_uri: Option<&str>,
    ) -> Result<ServiceContext> {
        let guard = self.locks.acquire(execution_uri);
        let test = Arc::new(
            self.deps
                .compilation
                .test_definition(test_definition_uri, test_compilation_uri)?,
        );
        let session = match self.sessions.load(execution_uri)? {
            Some(snapshot) => TestSession::from_snapshot(test, snapshot)?,
            None => TestSession::new(test, execution_uri)?,
        };
        debug!(state = ?session.state(), "service context ready");
        Ok(ServiceContext::new(
            self.runner_id,
            ContextUris {
                test_definition_uri: test_definition_uri.to_string(),
                test_compilation_uri: test_compilation_uri.to_string(),
                execution_uri: execution_uri.to_string(),
                user_uri: user_uri.map(str::to_string),
            },
            session,
            guard,
        ))
    }

    fn ensure_runner(&self, ctx: &ServiceContext, operation: &str) -> Result<()> {
        if ctx.runner_id != self.runner_id {
            return Err(RunnerError::ContextTypeMismatch {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Fail with `SessionClosed` once the session is closed.
    pub fn check(&self, ctx: &ServiceContext) -> Result<()> {
        self.ensure_runner(ctx, "check")?;
        if ctx.session.state() == TestSessionState::Closed {
            return Err(RunnerError::SessionClosed {
                session_id: ctx.session.session_id().to_string(),
            });
        }
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.deps.clock.now()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(execution = %ctx.execution_uri))]
    pub fn init(&self, ctx: &mut ServiceContext) -> Result<bool> {
        self.check(ctx)?;
        let now = self.now();
        let mut events = Vec::new();
        match ctx.session.state() {
            TestSessionState::Initial => {
                ctx.session.begin(now)?;
                info!(session_id = %ctx.session.session_id(), "session begun");
                events.push(DomainEvent::SessionBegun {
                    session_id: ctx.session.session_id().to_string(),
                });
                self.prime_adaptive(ctx);
            }
            TestSessionState::Suspended => {
                ctx.session.resume(now)?;
                events.push(DomainEvent::SessionResumed {
                    session_id: ctx.session.session_id().to_string(),
                });
            }
            _ => {}
        }
        self.deps.deliveries.clear_events(&ctx.execution_uri)?;
        ctx.session.start_item_timer(now);
        if ctx.session.is_timeout(now) {
            debug!("time limit exceeded, waiting for the timeout request");
        } else {
            ctx.session.begin_candidate_interaction(now);
        }
        self.commit(ctx, events)?;
        Ok(true)
    }

    #[instrument(
        skip_all,
        fields(execution = %ctx.execution_uri, direction = ?direction, scope = ?scope)
    )]
    pub fn move_to(
        &self,
        ctx: &mut ServiceContext,
        direction: Direction,
        scope: NavScope,
        target: Option<&str>,
    ) -> Result<MoveOutcome> {
        self.check(ctx)?;
        let now = self.now();
        let mut events = Vec::new();

        if let Some(overflow) = ctx.session.check_time_limits(now) {
            let handled = overflow.scope;
            self.recover(ctx, &overflow, now, &mut events)?;
            self.commit(ctx, events)?;
            return Ok(MoveOutcome::OverflowHandled(handled));
        }

        let saved_adaptive = ctx.session.save_adaptive_state();
        if ctx.session.is_adaptive()
            && matches!(direction, Direction::Next | Direction::Skip)
            && scope == NavScope::Item
            && ctx.session.select_adaptive_next(self.deps.selector.as_ref()).is_some()
        {
            self.continue_interaction(ctx, now, &mut events);
            self.commit(ctx, events)?;
            return Ok(MoveOutcome::Advanced);
        }

        let result = match ctx.session.navigate(
            direction,
            scope,
            target,
            now,
            self.deps.scoring.as_ref(),
        ) {
            Ok(result) => result,
            Err(err) if err.is_domain() => {
                info!(error = %err, "move refused");
                if let Some((section, state)) = saved_adaptive {
                    ctx.session.restore_adaptive_state(section, state);
                }
                return Ok(MoveOutcome::Failed(err.to_string()));
            }
            Err(err) => return Err(err),
        };
        self.transmit(ctx, &result.submissions)?;
        self.resume_or_finish(ctx, now, &mut events)?;
        self.commit(ctx, events)?;
        Ok(MoveOutcome::Advanced)
    }

    /// Move on without requiring a response.
    pub fn skip(
        &self,
        ctx: &mut ServiceContext,
        scope: NavScope,
        target: Option<&str>,
    ) -> Result<MoveOutcome> {
        self.move_to(ctx, Direction::Skip, scope, target)
    }

    /// Handle a client-reported timeout. `late` forces an overflow of `scope`
    /// even when the server-side timers disagree.
    #[instrument(skip_all, fields(execution = %ctx.execution_uri, scope = %scope, late = late))]
    pub fn timeout(
        &self,
        ctx: &mut ServiceContext,
        scope: TimeScope,
        reference: &str,
        late: bool,
    ) -> Result<bool> {
        self.check(ctx)?;
        let now = self.now();
        let mut events = Vec::new();
        if ctx.session.is_adaptive() {
            ctx.session.select_adaptive_next(self.deps.selector.as_ref());
        }
        ctx.session.close_timer(scope, reference, now);
        let overflow = if late {
            Some(Overflow {
                scope,
                source: reference.to_string(),
            })
        } else {
            ctx.session.check_time_limits(now)
        };
        match overflow {
            Some(overflow) => self.recover(ctx, &overflow, now, &mut events)?,
            None => debug!("no time limit exceeded"),
        }
        self.commit(ctx, events)?;
        Ok(true)
    }

    #[instrument(skip_all, fields(execution = %ctx.execution_uri))]
    pub fn pause(&self, ctx: &mut ServiceContext) -> Result<bool> {
        self.check(ctx)?;
        ctx.session.suspend(self.now())?;
        let events = vec![DomainEvent::SessionSuspended {
            session_id: ctx.session.session_id().to_string(),
        }];
        self.commit(ctx, events)?;
        Ok(true)
    }

    #[instrument(skip_all, fields(execution = %ctx.execution_uri))]
    pub fn resume(&self, ctx: &mut ServiceContext) -> Result<bool> {
        self.check(ctx)?;
        ctx.session.resume(self.now())?;
        let events = vec![DomainEvent::SessionResumed {
            session_id: ctx.session.session_id().to_string(),
        }];
        self.commit(ctx, events)?;
        Ok(true)
    }

    /// End the test early and finish the delivery with the configured state.
    #[instrument(skip_all, fields(execution = %ctx.execution_uri))]
    pub fn exit_test(&self, ctx: &mut ServiceContext) -> Result<bool> {
        self.check(ctx)?;
        let now = self.now();
        if ctx.session.is_adaptive() {
            ctx.session.select_adaptive_next(self.deps.selector.as_ref());
        }
        let mut events = vec![DomainEvent::SessionExited {
            session_id: ctx.session.session_id().to_string(),
        }];
        let submissions = ctx.session.end(now, self.deps.scoring.as_ref());
        self.transmit(ctx, &submissions)?;
        self.announce_close(ctx, &mut events)?;
        let finished = self.finish_delivery(ctx, self.deps.config.state_after_exit, &mut events)?;
        self.commit(ctx, events)?;
        Ok(finished)
    }

    /// Record the final delivery state. Only the owning candidate changes it;
    /// pending events are cleared and the finish event is emitted either way.
    #[instrument(skip_all, fields(execution = %ctx.execution_uri, state = ?state))]
    pub fn finish(&self, ctx: &mut ServiceContext, state: DeliveryState) -> Result<bool> {
        self.ensure_runner(ctx, "finish")?;
        let mut events = Vec::new();
        let finished = self.finish_delivery(ctx, state, &mut events)?;
        self.commit(ctx, events)?;
        Ok(finished)
    }

    /// Restart the current item timer.
    pub fn start_timer(&self, ctx: &mut ServiceContext) -> Result<bool> {
        self.check(ctx)?;
        ctx.session.start_item_timer(self.now());
        self.commit(ctx, Vec::new())?;
        Ok(true)
    }

    /// Stop the current item timer, accounting `duration` seconds measured by the client.
    pub fn end_timer(&self, ctx: &mut ServiceContext, duration: Option<f64>) -> Result<bool> {
        self.check(ctx)?;
        ctx.session.end_item_timer(duration, self.now());
        self.commit(ctx, Vec::new())?;
        Ok(true)
    }

    pub fn is_paused(&self, ctx: &ServiceContext) -> bool {
        ctx.session.state() == TestSessionState::Suspended
    }

    pub fn is_terminated(&self, ctx: &ServiceContext) -> bool {
        ctx.session.state() == TestSessionState::Closed
    }

    /// Store the session, delivering `SessionClosed` first when it just closed.
    pub fn persist(&self, ctx: &mut ServiceContext) -> Result<()> {
        self.ensure_runner(ctx, "persist")?;
        self.commit(ctx, Vec::new())
    }

    // ------------------------------------------------------------------
    // Responses
    // ------------------------------------------------------------------

    /// Convert a client payload against the current item's declarations.
    pub fn parses_item_response(
        &self,
        ctx: &ServiceContext,
        responses: &Json,
    ) -> Result<Vec<Variable>> {
        let item = current_item(ctx)?;
        Ok(parse_responses(&item.response_declarations, responses))
    }

    pub fn empty_response(&self, ctx: &ServiceContext, responses: &Json) -> Result<bool> {
        let variables = self.parses_item_response(ctx, responses)?;
        Ok(is_empty_response(&variables))
    }

    /// End an attempt on the current item with the submitted responses.
    #[instrument(skip_all, fields(execution = %ctx.execution_uri, item = ?item_ref))]
    pub fn store_item_response(
        &self,
        ctx: &mut ServiceContext,
        item_ref: Option<&str>,
        responses: &Json,
    ) -> Result<bool> {
        self.check(ctx)?;
        let current = current_item(ctx)?.identifier.clone();
        if let Some(requested) = item_ref {
            if requested != current {
                return Err(RunnerError::AttemptRejected {
                    item: requested.to_string(),
                    reason: format!("current item is '{current}'"),
                });
            }
        }
        let now = self.now();
        if let Err(err) = ctx.session.ensure_time_limits(now) {
            warn!(error = %err, item = %current, "response refused");
            return Ok(false);
        }
        let variables = self.parses_item_response(ctx, responses)?;
        let scoring = self.deps.scoring.as_ref();
        let (submissions, adaptive) = match ctx.session.current_assessment_session() {
            AssessmentSession::Adaptive(mut adaptive) => {
                adaptive.session.apply_responses(variables, 0.0);
                scoring.process(&adaptive.item_ref, &mut adaptive.session);
                let item_id = adaptive.item_ref.identifier.clone();
                match adaptive.session.variable(SCORE) {
                    Some(score) => {
                        adaptive.state.last_output.insert(
                            item_id.clone(),
                            ItemResult {
                                item_id: item_id.clone(),
                                score: score.clone(),
                                recorded_at: now,
                            },
                        );
                    }
                    None => info!(item = %item_id, "no SCORE outcome, result entry skipped"),
                }
                let attempt = adaptive.state.attempts(&item_id);
                let submission = ItemSubmission {
                    transmission_id: format!("{}.{item_id}.{attempt}", adaptive.session_id),
                    item_uri: adaptive.item_ref.item_uri().to_string(),
                    variables: adaptive.transmitted_variables(attempt + 1),
                };
                adaptive.state.increment_attempts(&item_id);
                (vec![submission], true)
            }
            AssessmentSession::Regular(session) => {
                (session.end_attempt(variables, now, scoring)?, false)
            }
        };
        if adaptive {
            ctx.session.record_adaptive_attempt()?;
        }
        self.transmit(ctx, &submissions)?;
        if !adaptive && ctx.session.is_running() && self.has_feedbacks(ctx, &current)? {
            ctx.session.enter_feedback()?;
        }
        self.commit(ctx, Vec::new())?;
        Ok(true)
    }

    /// Completion judgment for the item at `position`.
    ///
    /// Adaptive items are judged from the persisted item state; with none
    /// stored the answer is `!partial`.
    pub fn is_item_completed(
        &self,
        ctx: &ServiceContext,
        position: usize,
        partial: bool,
    ) -> Result<bool> {
        let Some(route_item) = ctx.session.route().get(position) else {
            return Err(RunnerError::inconsistent(format!(
                "route position {position} out of range"
            )));
        };
        if !route_item.adaptive {
            return Ok(ctx
                .session
                .item_session(position)
                .is_some_and(|item| item.is_responded(partial)));
        }
        let Some(state) = ctx.session.adaptive_state(&route_item.section) else {
            return Ok(false);
        };
        let Some(item_id) = state.current_item_id.as_deref() else {
            return Ok(false);
        };
        let Some(item) = ctx.session.test().item_ref(item_id) else {
            return Ok(false);
        };
        let stored = self
            .states
            .get_item_state(ctx.user_uri(), &ctx.execution_uri, item_id)?;
        // Nothing stored yet counts as complete only under full judgment.
        let Some(stored) = stored else {
            return Ok(!partial);
        };
        let variables = parse_responses(
            &item.response_declarations,
            &payload_from_item_state(&stored),
        );
        let mut session = ItemSession::new(Some(item));
        session.apply_responses(variables, 0.0);
        Ok(session.is_responded(partial))
    }

    pub fn get_item_session(&self, ctx: &ServiceContext) -> Result<ItemSessionView> {
        let item = current_item(ctx)?;
        let position = ctx.session.position();
        let partial = self.deps.config.partial_completion();
        let variables = if ctx.session.is_adaptive() {
            ItemSession::new(Some(item)).all_variables()
        } else {
            ctx.session
                .item_session(position)
                .map(ItemSession::all_variables)
                .unwrap_or_default()
        };
        Ok(ItemSessionView {
            item: item.identifier.clone(),
            variables,
            answered: self.is_item_completed(ctx, position, partial)?,
        })
    }

    /// Feedback is shown for the current item.
    pub fn display_feedbacks(&self, ctx: &ServiceContext) -> bool {
        self.deps.config.force_display_feedback
            || ctx.session.item_control(ctx.session.position()).show_feedback
    }

    /// The compiled item declares modal feedbacks that would be shown.
    pub fn has_feedbacks(&self, ctx: &mut ServiceContext, item_ref: &str) -> Result<bool> {
        if !self.display_feedbacks(ctx) {
            return Ok(false);
        }
        let data = match self.get_item_data(ctx, item_ref) {
            Ok(data) => data,
            Err(RunnerError::FileNotFound { path }) => {
                info!(path = %path, "item data missing, no feedbacks");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        Ok(data
            .get("feedbacks")
            .and_then(Json::as_array)
            .is_some_and(|feedbacks| !feedbacks.is_empty()))
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    /// Send client-provided variables to the result store.
    ///
    /// With `item`, they attach to the current item's transmission; otherwise
    /// to the test under the session id.
    pub fn store_variables(
        &self,
        ctx: &ServiceContext,
        item: Option<&str>,
        variables: &[Variable],
    ) -> Result<bool> {
        self.check(ctx)?;
        let test_uri = &ctx.test_definition_uri;
        let Some(requested) = item else {
            self.deps
                .results
                .store_test_variables(test_uri, variables, ctx.session.session_id())?;
            return Ok(true);
        };
        let current = current_item(ctx)?;
        if requested != current.identifier && requested != current.item_uri() {
            return Err(RunnerError::NotImplemented(format!(
                "storing variables for item '{requested}' which is not the current item '{}'",
                current.identifier
            )));
        }
        let occurrence = ctx.session.current().map_or(0, |item| item.occurrence);
        let transmission_id = format!(
            "{}.{}.{occurrence}",
            ctx.session.session_id(),
            current.identifier
        );
        self.deps.results.store_item_variables(
            test_uri,
            current.item_uri(),
            variables,
            &transmission_id,
        )?;
        Ok(true)
    }

    pub fn store_trace_variable(
        &self,
        ctx: &ServiceContext,
        item: Option<&str>,
        identifier: &str,
        value: &Json,
    ) -> Result<bool> {
        let variable =
            Variable::single_string(identifier, VariableKind::Trace, encode_value(value)?);
        self.store_variables(ctx, item, &[variable])
    }

    pub fn store_outcome_variable(
        &self,
        ctx: &ServiceContext,
        item: Option<&str>,
        identifier: &str,
        value: &Json,
    ) -> Result<bool> {
        let variable =
            Variable::single_string(identifier, VariableKind::Outcome, encode_value(value)?);
        self.store_variables(ctx, item, &[variable])
    }

    pub fn store_response_variable(
        &self,
        ctx: &ServiceContext,
        item: Option<&str>,
        identifier: &str,
        value: &Json,
    ) -> Result<bool> {
        let variable =
            Variable::single_string(identifier, VariableKind::Response, encode_value(value)?);
        self.store_variables(ctx, item, &[variable])
    }

    /// Store a candidate comment against the current item.
    pub fn comment(&self, ctx: &ServiceContext, text: &str) -> Result<bool> {
        let item = current_item(ctx)?.identifier.clone();
        self.store_response_variable(ctx, Some(&item), "comment", &Json::String(text.to_string()))
    }

    // ------------------------------------------------------------------
    // Item and tool state
    // ------------------------------------------------------------------

    pub fn get_item_state(&self, ctx: &ServiceContext, item_ref: &str) -> Result<Option<Json>> {
        self.ensure_runner(ctx, "get_item_state")?;
        self.states
            .get_item_state(ctx.user_uri(), &ctx.execution_uri, item_ref)
    }

    pub fn set_item_state(
        &self,
        ctx: &ServiceContext,
        item_ref: &str,
        state: Option<&Json>,
    ) -> Result<bool> {
        self.ensure_runner(ctx, "set_item_state")?;
        self.states
            .set_item_state(ctx.user_uri(), &ctx.execution_uri, item_ref, state)
    }

    pub fn get_tools_states(&self, ctx: &ServiceContext) -> Result<ToolStates> {
        self.ensure_runner(ctx, "get_tools_states")?;
        if !self.deps.config.tool_state_server_storage {
            return Ok(ToolStates::new());
        }
        self.states
            .get_tools_states(&ctx.execution_uri, &self.deps.config.tools)
    }

    pub fn set_tools_states(
        &self,
        ctx: &ServiceContext,
        states: &BTreeMap<String, Json>,
    ) -> Result<bool> {
        self.ensure_runner(ctx, "set_tools_states")?;
        if !self.deps.config.tool_state_server_storage {
            return Ok(false);
        }
        self.states.set_tools_states(&ctx.execution_uri, states)?;
        Ok(true)
    }

    /// Remove everything persisted for `execution_uri`.
    ///
    /// Takes the execution lock; do not call while holding a context for it.
    #[instrument(skip_all, fields(execution = %execution_uri))]
    pub fn delete_delivery_execution_data(&self, execution_uri: &str) -> Result<bool> {
        let _guard = self.locks.acquire(execution_uri);
        let items = self.states.purge_item_states(execution_uri)?;
        let tools = self.states.delete_tools_states(execution_uri)?;
        let session = self.sessions.delete(execution_uri)?;
        self.sessions.delete_client_store_id(execution_uri)?;
        info!(items, tools, session, "delivery execution data deleted");
        Ok(true)
    }

    /// Record a new client store id and return the previous one.
    pub fn switch_client_store_id(&self, ctx: &ServiceContext, id: &str) -> Result<Option<String>> {
        self.ensure_runner(ctx, "switch_client_store_id")?;
        self.sessions
            .switch_client_store_id(ctx.session.session_id(), id)
    }

    pub fn set_item_flag(
        &self,
        ctx: &mut ServiceContext,
        position: usize,
        flagged: bool,
    ) -> Result<bool> {
        self.check(ctx)?;
        ctx.session.set_flag(position, flagged)?;
        self.commit(ctx, Vec::new())?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Compiled item data
    // ------------------------------------------------------------------

    /// Compiled item data; a missing file is an error.
    pub fn get_item_data(&self, ctx: &mut ServiceContext, item_ref: &str) -> Result<Json> {
        self.ensure_runner(ctx, "get_item_data")?;
        self.load_item_file(ctx, item_ref, ITEM_DATA_FILE)
    }

    pub fn get_item_variable_elements(
        &self,
        ctx: &mut ServiceContext,
        item_ref: &str,
    ) -> Result<Json> {
        self.load_optional_item_file(ctx, item_ref, VARIABLE_ELEMENTS_FILE)
    }

    pub fn get_item_metadata_elements(
        &self,
        ctx: &mut ServiceContext,
        item_ref: &str,
    ) -> Result<Json> {
        self.load_optional_item_file(ctx, item_ref, METADATA_ELEMENTS_FILE)
    }

    pub fn get_item_portable_elements(
        &self,
        ctx: &mut ServiceContext,
        item_ref: &str,
    ) -> Result<Json> {
        self.load_optional_item_file(ctx, item_ref, PORTABLE_ELEMENTS_FILE)
    }

    fn load_optional_item_file(
        &self,
        ctx: &mut ServiceContext,
        item_ref: &str,
        file: &str,
    ) -> Result<Json> {
        self.ensure_runner(ctx, "get_item_elements")?;
        match self.load_item_file(ctx, item_ref, file) {
            Err(RunnerError::FileNotFound { path }) => {
                info!(path = %path, "compiled file missing, older delivery package");
                Ok(Json::Object(Map::new()))
            }
            other => other,
        }
    }

    fn load_item_file(&self, ctx: &mut ServiceContext, item_ref: &str, file: &str) -> Result<Json> {
        let key = (item_ref.to_string(), file.to_string());
        if let Some(cached) = ctx.item_cache.get(&key) {
            return Ok(cached.clone());
        }
        let item = ctx.session.test().item_ref(item_ref).ok_or_else(|| {
            RunnerError::inconsistent(format!("unknown item ref '{item_ref}'"))
        })?;
        let href = ItemHref::parse(&item.href)?;
        let mut languages = Vec::new();
        if let Some(language) = ctx.language.as_deref() {
            languages.push(language);
        }
        if !languages.contains(&self.deps.config.default_language.as_str()) {
            languages.push(&self.deps.config.default_language);
        }
        let raw = read_item_file(self.deps.compilation.as_ref(), &href, file, &languages)?;
        let data: Json = serde_json::from_str(&raw).map_err(|err| {
            RunnerError::inconsistent(format!("unable to decode {file} of '{item_ref}': {err}"))
        })?;
        ctx.item_cache.insert(key, data.clone());
        Ok(data)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    pub fn get_test_context(&self, ctx: &mut ServiceContext) -> Result<TestContext> {
        self.ensure_runner(ctx, "get_test_context")?;
        let current = current_item(ctx).ok().map(|item| item.identifier.clone());
        let has_feedbacks = match current {
            Some(item_ref) => self.has_feedbacks(ctx, &item_ref)?,
            None => false,
        };
        let partial = self.deps.config.partial_completion();
        let ctx = &*ctx;
        let completed = |position: usize| {
            self.is_item_completed(ctx, position, partial)
                .unwrap_or_else(|err| {
                    warn!(position, error = %err, "completion judgment failed");
                    false
                })
        };
        Ok(views::test_context(
            &ctx.session,
            &ContextInputs {
                config: &self.deps.config,
                now: self.now(),
                completed: &completed,
                has_feedbacks,
            },
        ))
    }

    pub fn get_test_map(&self, ctx: &ServiceContext, partial: bool) -> Result<TestMap> {
        self.ensure_runner(ctx, "get_test_map")?;
        let partial_answers = self.deps.config.partial_completion();
        let completed = |position: usize| {
            self.is_item_completed(ctx, position, partial_answers)
                .unwrap_or_else(|err| {
                    warn!(position, error = %err, "completion judgment failed");
                    false
                })
        };
        Ok(views::test_map(&ctx.session, partial, &completed))
    }

    /// Limits declared on the current scope of `scope`.
    pub fn get_time_limits_from_session(
        &self,
        ctx: &ServiceContext,
        scope: TimeScope,
    ) -> Option<TimeLimits> {
        let session = &ctx.session;
        let current = session.current()?;
        let test = session.test();
        match scope {
            TimeScope::Test => test.time_limits.clone(),
            TimeScope::TestPart => test.part(&current.test_part)?.time_limits.clone(),
            TimeScope::Section => test.section(&current.section)?.time_limits.clone(),
            TimeScope::Item => session.current_item_ref()?.time_limits.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Timeout recovery followed by resume-or-finish.
    fn recover(
        &self,
        ctx: &mut ServiceContext,
        overflow: &Overflow,
        now: DateTime<Utc>,
        events: &mut Vec<DomainEvent>,
    ) -> Result<()> {
        let session_id = ctx.session.session_id().to_string();
        info!(scope = %overflow.scope, source = %overflow.source, "duration overflow");
        events.push(DomainEvent::SessionTimedOut {
            session_id: session_id.clone(),
            scope: overflow.scope,
            handled: false,
        });
        let result = ctx
            .session
            .handle_overflow(overflow, now, self.deps.scoring.as_ref())?;
        self.transmit(ctx, &result.submissions)?;
        events.push(DomainEvent::SessionTimedOut {
            session_id,
            scope: overflow.scope,
            handled: true,
        });
        self.resume_or_finish(ctx, now, events)
    }

    fn resume_or_finish(
        &self,
        ctx: &mut ServiceContext,
        now: DateTime<Utc>,
        events: &mut Vec<DomainEvent>,
    ) -> Result<()> {
        if ctx.session.is_running() {
            self.prime_adaptive(ctx);
            self.continue_interaction(ctx, now, events);
            return Ok(());
        }
        self.announce_close(ctx, events)?;
        self.finish_delivery(ctx, DeliveryState::Finished, events)?;
        Ok(())
    }

    fn continue_interaction(
        &self,
        ctx: &mut ServiceContext,
        now: DateTime<Utc>,
        events: &mut Vec<DomainEvent>,
    ) {
        ctx.session.begin_candidate_interaction(now);
        events.push(DomainEvent::ContinueInteraction {
            session_id: ctx.session.session_id().to_string(),
            position: ctx.session.position(),
        });
    }

    fn prime_adaptive(&self, ctx: &mut ServiceContext) {
        if ctx.session.needs_adaptive_selection() {
            ctx.session
                .select_adaptive_next(self.deps.selector.as_ref());
        }
    }

    /// Store test-level outcomes and queue `SessionClosed` once per session.
    fn announce_close(
        &self,
        ctx: &mut ServiceContext,
        events: &mut Vec<DomainEvent>,
    ) -> Result<()> {
        if ctx.closed_announced || ctx.session.state() != TestSessionState::Closed {
            return Ok(());
        }
        self.deps.results.store_test_variables(
            &ctx.test_definition_uri,
            &ctx.session.outcomes(),
            ctx.session.session_id(),
        )?;
        events.push(DomainEvent::SessionClosed {
            session_id: ctx.session.session_id().to_string(),
            user_uri: ctx.user_uri.clone(),
        });
        ctx.closed_announced = true;
        Ok(())
    }

    fn finish_delivery(
        &self,
        ctx: &ServiceContext,
        state: DeliveryState,
        events: &mut Vec<DomainEvent>,
    ) -> Result<bool> {
        let execution = &ctx.execution_uri;
        let owner = self.deps.deliveries.owner(execution)?;
        let owned = owner.as_deref() == ctx.user_uri();
        if owned {
            self.deps.deliveries.set_state(execution, state)?;
        } else {
            warn!(
                owner = ?owner,
                user = ?ctx.user_uri(),
                "non owner of the delivery execution tried to finish it"
            );
        }
        self.deps.deliveries.clear_events(execution)?;
        let outcomes = self
            .deps
            .results
            .test_outcomes(ctx.session.session_id())?;
        events.push(DomainEvent::DeliveryExecutionFinished {
            execution_uri: execution.clone(),
            state,
            outcomes,
            manual_scored: ctx.session.is_manual_scored(),
        });
        Ok(owned)
    }

    fn transmit(&self, ctx: &ServiceContext, submissions: &[ItemSubmission]) -> Result<()> {
        for submission in submissions {
            debug!(transmission_id = %submission.transmission_id, "transmitting item variables");
            self.deps.results.store_item_variables(
                &ctx.test_definition_uri,
                &submission.item_uri,
                &submission.variables,
                &submission.transmission_id,
            )?;
        }
        Ok(())
    }

    /// Deliver `events` in order, then persist the session.
    fn commit(&self, ctx: &mut ServiceContext, mut events: Vec<DomainEvent>) -> Result<()> {
        self.announce_close(ctx, &mut events)?;
        for event in &events {
            self.deps.events.deliver(event);
        }
        self.sessions
            .save(&ctx.execution_uri, ctx.session.snapshot())
    }
}

fn current_item(ctx: &ServiceContext) -> Result<&ItemRef> {
    ctx.session.current_item_ref().ok_or_else(|| {
        RunnerError::inconsistent(format!(
            "no current item in session '{}'",
            ctx.session.session_id()
        ))
    })
}

/// Strings pass through, numbers are stringified, anything else is JSON-encoded.
fn encode_value(value: &Json) -> Result<String> {
    Ok(match value {
        Json::String(text) => text.clone(),
        Json::Number(number) => number.to_string(),
        other => serde_json::to_string(other)?,
    })
}
