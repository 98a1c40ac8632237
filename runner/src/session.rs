//! Test session state machine.
//!
//! [`TestSession`] owns the lifecycle state, the route cursor, per-item
//! sessions, timers and adaptive bookkeeping of one candidate attempt. All
//! mutation goes through its methods; the serializable part lives in
//! [`SessionSnapshot`] so the session can be resumed after interruption.
//!
//! Methods take the current time explicitly and return the item submissions
//! produced by response processing. Transmitting them, emitting events and
//! persisting are left to the service.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adaptive::{AdaptiveItemSelector, AdaptiveState, SelectionRequest};
use crate::core::item::{ItemSession, NUM_ATTEMPTS};
use crate::core::navigation::{Destination, destination};
use crate::core::route::{Route, RouteItem};
use crate::core::timing::{
    Overflow, ScopeLimits, SessionTimers, TimeConstraint, constraints, first_overflow,
};
use crate::core::types::{
    Direction, ItemSessionState, NavScope, NavigationMode, SubmissionMode, TestSessionState,
    TimeScope,
};
use crate::core::value::{Scalar, Value, Variable, VariableKind, VariableSet};
use crate::definition::{AssessmentTest, ItemRef, ItemSessionControl};
use crate::error::{Result, RunnerError};
use crate::scoring::ItemScoring;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted form of a test session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub session_id: String,
    pub test_identifier: String,
    pub state: TestSessionState,
    pub position: usize,
    pub item_sessions: Vec<ItemSession>,
    pub timers: SessionTimers,
    /// Timer keys of scopes closed by a timeout.
    pub closed_scopes: BTreeSet<String>,
    pub flagged: BTreeSet<usize>,
    /// Adaptive bookkeeping keyed by section id.
    pub adaptive: BTreeMap<String, AdaptiveState>,
    pub outcomes: VariableSet,
    pub started_at: Option<DateTime<Utc>>,
}

/// Processed item variables ready for the result store.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSubmission {
    pub transmission_id: String,
    pub item_uri: String,
    pub variables: Vec<Variable>,
}

/// Effect of a navigation on the route.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NavigationResult {
    pub submissions: Vec<ItemSubmission>,
    /// The route was exhausted and the session closed.
    pub ended: bool,
}

/// Session the current operation acts on.
pub enum AssessmentSession<'a> {
    Regular(&'a mut TestSession),
    /// Ephemeral item session for an item chosen in an adaptive section.
    Adaptive(AdaptiveItemSession<'a>),
}

pub struct AdaptiveItemSession<'a> {
    pub session_id: String,
    pub item_ref: ItemRef,
    pub session: ItemSession,
    pub state: &'a mut AdaptiveState,
}

pub fn scope_key(scope: TimeScope, id: &str) -> String {
    match scope {
        TimeScope::Test => format!("test:{id}"),
        TimeScope::TestPart => format!("part:{id}"),
        TimeScope::Section => format!("section:{id}"),
        TimeScope::Item => format!("item:{id}.0"),
    }
}

#[derive(Debug, Clone)]
pub struct TestSession {
    test: Arc<AssessmentTest>,
    route: Route,
    snap: SessionSnapshot,
}

impl TestSession {
    pub fn new(test: Arc<AssessmentTest>, session_id: &str) -> Result<Self> {
        let route = Route::build(&test);
        if route.is_empty() {
            return Err(RunnerError::inconsistent(format!(
                "test '{}' has an empty route",
                test.identifier
            )));
        }
        let item_sessions = route
            .items()
            .iter()
            .map(|route_item| {
                let item = (!route_item.adaptive)
                    .then(|| test.item_ref(&route_item.item_ref))
                    .flatten();
                ItemSession::new(item)
            })
            .collect();
        let outcomes = test
            .outcome_declarations
            .iter()
            .map(|decl| {
                let variable = Variable::from_declaration(decl, VariableKind::Outcome);
                (variable.identifier.clone(), variable)
            })
            .collect();
        let snap = SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: session_id.to_string(),
            test_identifier: test.identifier.clone(),
            state: TestSessionState::Initial,
            position: 0,
            item_sessions,
            timers: SessionTimers::default(),
            closed_scopes: BTreeSet::new(),
            flagged: BTreeSet::new(),
            adaptive: BTreeMap::new(),
            outcomes,
            started_at: None,
        };
        Ok(Self { test, route, snap })
    }

    /// Rebuild a session from its persisted snapshot.
    pub fn from_snapshot(test: Arc<AssessmentTest>, snap: SessionSnapshot) -> Result<Self> {
        if snap.version != SNAPSHOT_VERSION {
            return Err(RunnerError::inconsistent(format!(
                "unsupported session snapshot version {}",
                snap.version
            )));
        }
        if snap.test_identifier != test.identifier {
            return Err(RunnerError::inconsistent(format!(
                "snapshot belongs to test '{}', not '{}'",
                snap.test_identifier, test.identifier
            )));
        }
        let route = Route::build(&test);
        if snap.item_sessions.len() != route.len() || snap.position >= route.len() {
            return Err(RunnerError::inconsistent(
                "snapshot does not match the test route",
            ));
        }
        Ok(Self { test, route, snap })
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snap
    }

    pub fn test(&self) -> &AssessmentTest {
        &self.test
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn session_id(&self) -> &str {
        &self.snap.session_id
    }

    pub fn state(&self) -> TestSessionState {
        self.snap.state
    }

    pub fn position(&self) -> usize {
        self.snap.position
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.snap.started_at
    }

    /// Begun and not closed.
    pub fn is_running(&self) -> bool {
        !matches!(
            self.snap.state,
            TestSessionState::Initial | TestSessionState::Closed
        )
    }

    /// Current route item while the session runs.
    pub fn current(&self) -> Option<&RouteItem> {
        if !self.is_running() {
            return None;
        }
        self.route.get(self.snap.position)
    }

    /// The current route item belongs to an adaptive section.
    pub fn is_adaptive(&self) -> bool {
        self.current().is_some_and(|item| item.adaptive)
    }

    /// Item presented at the cursor; the selected pool item in adaptive sections.
    pub fn current_item_ref(&self) -> Option<&ItemRef> {
        let route_item = self.current()?;
        if route_item.adaptive {
            let id = self
                .snap
                .adaptive
                .get(&route_item.section)?
                .current_item_id
                .as_deref()?;
            return self.test.item_ref(id);
        }
        self.test.item_ref(&route_item.item_ref)
    }

    pub fn item_session(&self, position: usize) -> Option<&ItemSession> {
        self.snap.item_sessions.get(position)
    }

    pub fn current_item_session(&self) -> Option<&ItemSession> {
        self.current()?;
        self.item_session(self.snap.position)
    }

    /// Item session control in force at `position`.
    pub fn item_control(&self, position: usize) -> ItemSessionControl {
        let Some(route_item) = self.route.get(position) else {
            return ItemSessionControl::default();
        };
        let item = self.test.item_ref(&route_item.item_ref);
        if let Some(control) = item.and_then(|item| item.item_session_control.clone()) {
            return control;
        }
        self.test
            .part(&route_item.test_part)
            .map(|part| part.item_session_control.clone())
            .unwrap_or_default()
    }

    pub fn is_flagged(&self, position: usize) -> bool {
        self.snap.flagged.contains(&position)
    }

    pub fn set_flag(&mut self, position: usize, flagged: bool) -> Result<()> {
        if position >= self.route.len() {
            return Err(RunnerError::inconsistent(format!(
                "route position {position} out of range"
            )));
        }
        if flagged {
            self.snap.flagged.insert(position);
        } else {
            self.snap.flagged.remove(&position);
        }
        Ok(())
    }

    pub fn adaptive_state(&self, section: &str) -> Option<&AdaptiveState> {
        self.snap.adaptive.get(section)
    }

    pub fn outcomes(&self) -> Vec<Variable> {
        self.snap.outcomes.values().cloned().collect()
    }

    pub fn is_manual_scored(&self) -> bool {
        self.test.is_manual_scored()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.snap.state != TestSessionState::Initial {
            return Err(RunnerError::inconsistent("test session already begun"));
        }
        self.snap.state = TestSessionState::Interacting;
        self.snap.started_at = Some(now);
        self.select_item(self.snap.position);
        Ok(())
    }

    pub fn suspend(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_running()?;
        if self.snap.state == TestSessionState::Suspended {
            return Ok(());
        }
        self.snap.state = TestSessionState::Suspended;
        self.snap.timers.stop_all(now);
        let item = &mut self.snap.item_sessions[self.snap.position];
        if !item.is_closed() {
            item.state = ItemSessionState::Suspended;
        }
        Ok(())
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.ensure_running()?;
        if self.snap.state != TestSessionState::Suspended {
            return Ok(());
        }
        self.snap.state = TestSessionState::Interacting;
        self.begin_candidate_interaction(now);
        Ok(())
    }

    /// Show modal feedback for the current item.
    pub fn enter_feedback(&mut self) -> Result<()> {
        self.ensure_running()?;
        self.snap.state = TestSessionState::ModalFeedback;
        let item = &mut self.snap.item_sessions[self.snap.position];
        if !item.is_closed() {
            item.state = ItemSessionState::ModalFeedback;
        }
        Ok(())
    }

    /// Arm timers of the active scopes and mark the current item interacting.
    ///
    /// Leaves modal feedback; a suspended session stays suspended.
    pub fn begin_candidate_interaction(&mut self, now: DateTime<Utc>) {
        match self.snap.state {
            TestSessionState::Suspended | TestSessionState::Initial | TestSessionState::Closed => {
                return;
            }
            TestSessionState::ModalFeedback => self.snap.state = TestSessionState::Interacting,
            TestSessionState::Interacting => {}
        }
        let position = self.snap.position;
        let active = self.active_timer_keys();
        self.snap.timers.sync(&active, now);
        let item = &mut self.snap.item_sessions[position];
        item.presented = true;
        if !item.is_closed() {
            item.state = ItemSessionState::Interacting;
        }
    }

    /// Close the session, processing any pending responses.
    pub fn end(&mut self, now: DateTime<Utc>, scoring: &dyn ItemScoring) -> Vec<ItemSubmission> {
        if self.snap.state == TestSessionState::Closed {
            return Vec::new();
        }
        let mut submissions = Vec::new();
        for position in 0..self.route.len() {
            submissions.extend(self.close_item(position, scoring));
        }
        self.snap.timers.stop_all(now);
        self.snap.state = TestSessionState::Closed;
        debug!(session_id = %self.snap.session_id, "test session closed");
        submissions
    }

    fn ensure_running(&self) -> Result<()> {
        match self.snap.state {
            TestSessionState::Closed => Err(RunnerError::SessionClosed {
                session_id: self.snap.session_id.clone(),
            }),
            TestSessionState::Initial => Err(RunnerError::inconsistent(
                "test session has not begun",
            )),
            _ => Ok(()),
        }
    }

    fn select_item(&mut self, position: usize) {
        if let Some(item) = self.snap.item_sessions.get_mut(position) {
            if item.state == ItemSessionState::NotSelected {
                item.state = ItemSessionState::Initial;
            }
        }
    }

    // ------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------

    /// End an attempt on the current item with `responses`.
    ///
    /// Individual submission processes the item immediately; simultaneous
    /// submission keeps the responses pending until the candidate leaves the item.
    pub fn end_attempt(
        &mut self,
        responses: Vec<Variable>,
        now: DateTime<Utc>,
        scoring: &dyn ItemScoring,
    ) -> Result<Vec<ItemSubmission>> {
        self.ensure_running()?;
        let position = self.snap.position;
        let route_item = self.route_item(position)?.clone();
        let control = self.item_control(position);
        let item = &self.snap.item_sessions[position];
        if item.is_closed() {
            return Err(RunnerError::AttemptRejected {
                item: route_item.item_ref,
                reason: "item session is closed".to_string(),
            });
        }
        if control.max_attempts > 0 && item.num_attempts >= control.max_attempts {
            return Err(RunnerError::AttemptRejected {
                item: route_item.item_ref,
                reason: format!("maximum of {} attempts reached", control.max_attempts),
            });
        }
        let duration = self.snap.timers.elapsed_secs(&route_item.item_key(), now);
        let item = &mut self.snap.item_sessions[position];
        item.apply_responses(responses, duration);

        let mut submissions = Vec::new();
        match route_item.submission_mode {
            SubmissionMode::Individual => {
                submissions.extend(self.process_item(position, scoring));
            }
            SubmissionMode::Simultaneous => {
                self.snap.item_sessions[position].pending = true;
            }
        }
        let item = &mut self.snap.item_sessions[position];
        if control.max_attempts > 0 && item.num_attempts >= control.max_attempts {
            item.state = ItemSessionState::Closed;
            if item.pending {
                submissions.extend(self.process_item(position, scoring));
            }
        }
        Ok(submissions)
    }

    /// Count an attempt on the adaptive route item after an ephemeral item was processed.
    pub fn record_adaptive_attempt(&mut self) -> Result<()> {
        self.ensure_running()?;
        let item = &mut self.snap.item_sessions[self.snap.position];
        item.num_attempts += 1;
        let attempts = i64::from(item.num_attempts);
        item.set_scalar(NUM_ATTEMPTS, Scalar::Integer(attempts));
        Ok(())
    }

    /// Run response processing for pending or individual responses.
    fn process_item(
        &mut self,
        position: usize,
        scoring: &dyn ItemScoring,
    ) -> Option<ItemSubmission> {
        let route_item = self.route.get(position)?;
        if route_item.adaptive {
            self.snap.item_sessions[position].pending = false;
            return None;
        }
        let item_ref = self.test.item_ref(&route_item.item_ref)?;
        let item = &mut self.snap.item_sessions[position];
        if item.num_attempts == 0 {
            return None;
        }
        scoring.process(item_ref, item);
        item.pending = false;
        Some(ItemSubmission {
            transmission_id: format!(
                "{}.{}.{}",
                self.snap.session_id, route_item.item_ref, route_item.occurrence
            ),
            item_uri: item_ref.item_uri().to_string(),
            variables: item.all_variables(),
        })
    }

    fn close_item(&mut self, position: usize, scoring: &dyn ItemScoring) -> Option<ItemSubmission> {
        let item = self.snap.item_sessions.get(position)?;
        let was_pending = item.pending;
        self.snap.item_sessions[position].state = ItemSessionState::Closed;
        if was_pending {
            return self.process_item(position, scoring);
        }
        None
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    /// Move the cursor according to navigation-mode rules.
    pub fn navigate(
        &mut self,
        direction: Direction,
        scope: NavScope,
        target: Option<&str>,
        now: DateTime<Utc>,
        scoring: &dyn ItemScoring,
    ) -> Result<NavigationResult> {
        self.ensure_running()?;
        let from = self.snap.position;
        let dest = destination(&self.route, from, direction, scope, target)?;
        let current = self.route_item(from)?;
        if current.navigation_mode == NavigationMode::Linear {
            self.check_minimum_times(from, dest, now)?;
        }
        Ok(self.relocate(from, dest, now, scoring))
    }

    /// Forward move used by timeout recovery; ignores minimum times.
    fn move_forward(
        &mut self,
        scope: NavScope,
        now: DateTime<Utc>,
        scoring: &dyn ItemScoring,
    ) -> Result<NavigationResult> {
        let from = self.snap.position;
        let dest = destination(&self.route, from, Direction::Next, scope, None)?;
        Ok(self.relocate(from, dest, now, scoring))
    }

    fn relocate(
        &mut self,
        from: usize,
        dest: Destination,
        now: DateTime<Utc>,
        scoring: &dyn ItemScoring,
    ) -> NavigationResult {
        let mut result = NavigationResult {
            submissions: self.leave_item(from, scoring),
            ended: false,
        };
        match dest {
            Destination::Position(to) => {
                self.snap.position = to;
                self.select_item(to);
                debug!(from, to, "route cursor moved");
            }
            Destination::EndOfRoute => {
                result.submissions.extend(self.end(now, scoring));
                result.ended = true;
            }
        }
        result
    }

    fn leave_item(&mut self, position: usize, scoring: &dyn ItemScoring) -> Vec<ItemSubmission> {
        let Some(route_item) = self.route.get(position).cloned() else {
            return Vec::new();
        };
        let mut submissions = Vec::new();
        if route_item.submission_mode == SubmissionMode::Simultaneous {
            for pending in self.route.section_bounds(position) {
                if self.snap.item_sessions[pending].pending {
                    submissions.extend(self.process_item(pending, scoring));
                }
            }
        }
        let item = &mut self.snap.item_sessions[position];
        if !item.is_closed() {
            item.state = match route_item.navigation_mode {
                NavigationMode::Linear => ItemSessionState::Closed,
                NavigationMode::Nonlinear => ItemSessionState::Suspended,
            };
        }
        submissions
    }

    fn check_minimum_times(
        &self,
        from: usize,
        dest: Destination,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let section = self.route.section_bounds(from);
        let part = self.route.part_bounds(from);
        let leaves = |range: &std::ops::Range<usize>| match dest {
            Destination::Position(to) => !range.contains(&to),
            Destination::EndOfRoute => true,
        };
        let leaving_item = match dest {
            Destination::Position(to) => to != from,
            Destination::EndOfRoute => true,
        };
        for constraint in self.active_constraints(now) {
            let leaving = match constraint.scope {
                TimeScope::Test => dest == Destination::EndOfRoute,
                TimeScope::TestPart => leaves(&part),
                TimeScope::Section => leaves(&section),
                TimeScope::Item => leaving_item,
            };
            if leaving && constraint.underflows() {
                return Err(RunnerError::DurationUnderflow {
                    scope: constraint.scope,
                    source_id: constraint.source,
                });
            }
        }
        Ok(())
    }

    fn route_item(&self, position: usize) -> Result<&RouteItem> {
        self.route.get(position).ok_or_else(|| {
            RunnerError::inconsistent(format!("route position {position} out of range"))
        })
    }

    // ------------------------------------------------------------------
    // Timing
    // ------------------------------------------------------------------

    fn active_scopes(&self) -> Vec<ScopeLimits<'_>> {
        let Some(route_item) = self.route.get(self.snap.position) else {
            return Vec::new();
        };
        let mut scopes = vec![ScopeLimits {
            scope: TimeScope::Test,
            source: &self.test.identifier,
            key: scope_key(TimeScope::Test, &self.test.identifier),
            limits: self.test.time_limits.as_ref(),
        }];
        if let Some(part) = self.test.part(&route_item.test_part) {
            scopes.push(ScopeLimits {
                scope: TimeScope::TestPart,
                source: &part.identifier,
                key: scope_key(TimeScope::TestPart, &part.identifier),
                limits: part.time_limits.as_ref(),
            });
        }
        if let Some(section) = self.test.section(&route_item.section) {
            scopes.push(ScopeLimits {
                scope: TimeScope::Section,
                source: &section.identifier,
                key: scope_key(TimeScope::Section, &section.identifier),
                limits: section.time_limits.as_ref(),
            });
        }
        let item_limits = if route_item.adaptive {
            None
        } else {
            self.test
                .item_ref(&route_item.item_ref)
                .and_then(|item| item.time_limits.as_ref())
        };
        scopes.push(ScopeLimits {
            scope: TimeScope::Item,
            source: &route_item.item_ref,
            key: route_item.item_key(),
            limits: item_limits,
        });
        scopes
    }

    fn active_timer_keys(&self) -> Vec<String> {
        let closed_item = self.snap.item_sessions[self.snap.position].is_closed();
        self.active_scopes()
            .into_iter()
            .filter(|scope| !self.snap.closed_scopes.contains(&scope.key))
            .filter(|scope| !(closed_item && scope.scope == TimeScope::Item))
            .map(|scope| scope.key)
            .collect()
    }

    fn active_constraints(&self, now: DateTime<Utc>) -> Vec<TimeConstraint> {
        constraints(
            &self.active_scopes(),
            &self.snap.timers,
            &self.snap.closed_scopes,
            now,
        )
    }

    /// Constraints declaring a minimum or maximum, for client display.
    pub fn time_constraints(&self, now: DateTime<Utc>) -> Vec<TimeConstraint> {
        if !self.is_running() {
            return Vec::new();
        }
        self.active_constraints(now)
            .into_iter()
            .filter(TimeConstraint::is_regular)
            .collect()
    }

    /// Lazily detect a duration overflow on the active scopes.
    pub fn check_time_limits(&self, now: DateTime<Utc>) -> Option<Overflow> {
        if !self.is_running() {
            return None;
        }
        first_overflow(&self.active_constraints(now))
    }

    /// Strict form of [`Self::check_time_limits`].
    pub fn ensure_time_limits(&self, now: DateTime<Utc>) -> Result<()> {
        match self.check_time_limits(now) {
            Some(overflow) => Err(RunnerError::DurationOverflow {
                scope: overflow.scope,
                source_id: overflow.source,
            }),
            None => Ok(()),
        }
    }

    pub fn is_timeout(&self, now: DateTime<Utc>) -> bool {
        self.check_time_limits(now).is_some()
    }

    /// Stop the timer of the named scope.
    pub fn close_timer(&mut self, scope: TimeScope, reference: &str, now: DateTime<Utc>) {
        let key = match (scope, self.current()) {
            (TimeScope::Item, Some(current)) if current.item_ref == reference => current.item_key(),
            _ => scope_key(scope, reference),
        };
        self.snap.timers.stop(&key, now);
    }

    pub fn start_item_timer(&mut self, now: DateTime<Utc>) {
        if self.snap.state != TestSessionState::Interacting {
            return;
        }
        if let Some(current) = self.current() {
            let key = current.item_key();
            if !self.snap.closed_scopes.contains(&key) {
                self.snap.timers.start(&key, now);
            }
        }
    }

    /// Stop the item timer, optionally accounting a client-measured duration.
    pub fn end_item_timer(&mut self, duration: Option<f64>, now: DateTime<Utc>) {
        let Some(key) = self.current().map(RouteItem::item_key) else {
            return;
        };
        match duration {
            Some(secs) => self.snap.timers.stop_with_duration(&key, secs, now),
            None => self.snap.timers.stop(&key, now),
        }
    }

    /// Apply the timeout recovery policy for `overflow`.
    pub fn handle_overflow(
        &mut self,
        overflow: &Overflow,
        now: DateTime<Utc>,
        scoring: &dyn ItemScoring,
    ) -> Result<NavigationResult> {
        self.ensure_running()?;
        let linear = self.route_item(self.snap.position)?.navigation_mode == NavigationMode::Linear;
        match (overflow.scope, linear) {
            (TimeScope::Test, _) => Ok(NavigationResult {
                submissions: self.end(now, scoring),
                ended: true,
            }),
            (TimeScope::TestPart, true) => self.move_forward(NavScope::TestPart, now, scoring),
            (TimeScope::Section, true) => self.move_forward(NavScope::Section, now, scoring),
            (TimeScope::Item, true) => self.move_forward(NavScope::Item, now, scoring),
            (scope, false) => Ok(NavigationResult {
                submissions: self.close_scope(scope, now, scoring),
                ended: false,
            }),
        }
    }

    /// Close the current part, section or item: its item sessions end and its timers stop counting.
    pub fn close_scope(
        &mut self,
        scope: TimeScope,
        now: DateTime<Utc>,
        scoring: &dyn ItemScoring,
    ) -> Vec<ItemSubmission> {
        let position = self.snap.position;
        let Some(current) = self.route.get(position).cloned() else {
            return Vec::new();
        };
        let (positions, mut keys) = match scope {
            TimeScope::Test => (
                0..self.route.len(),
                vec![scope_key(TimeScope::Test, &self.test.identifier)],
            ),
            TimeScope::TestPart => (
                self.route.part_bounds(position),
                vec![scope_key(TimeScope::TestPart, &current.test_part)],
            ),
            TimeScope::Section => (
                self.route.section_bounds(position),
                vec![scope_key(TimeScope::Section, &current.section)],
            ),
            TimeScope::Item => (position..position + 1, Vec::new()),
        };
        let mut submissions = Vec::new();
        for closed in positions {
            let route_item = &self.route.items()[closed];
            keys.push(route_item.item_key());
            if scope != TimeScope::Item {
                keys.push(scope_key(TimeScope::Section, &route_item.section));
            }
            submissions.extend(self.close_item(closed, scoring));
        }
        for key in keys {
            self.snap.timers.stop(&key, now);
            self.snap.closed_scopes.insert(key);
        }
        debug!(scope = %scope, position, "scope closed after timeout");
        submissions
    }

    // ------------------------------------------------------------------
    // Adaptive sections
    // ------------------------------------------------------------------

    /// Ask `selector` for the next item of the current adaptive section and record it.
    pub fn select_adaptive_next(&mut self, selector: &dyn AdaptiveItemSelector) -> Option<String> {
        let section_id = self.current().filter(|item| item.adaptive)?.section.clone();
        let test = Arc::clone(&self.test);
        let section = test.section(&section_id)?;
        let state = self.snap.adaptive.entry(section_id).or_default();
        let next = selector.select_next(&SelectionRequest {
            session_id: &self.snap.session_id,
            section,
            state: &*state,
        });
        debug!(item = ?next, section = %section.identifier, "adaptive item selected");
        state.record_selection(next.clone());
        next
    }

    /// Copy of the current adaptive section's bookkeeping, keyed by section id.
    pub fn save_adaptive_state(&self) -> Option<(String, Option<AdaptiveState>)> {
        let section = self.current().filter(|item| item.adaptive)?.section.clone();
        let state = self.snap.adaptive.get(&section).cloned();
        Some((section, state))
    }

    /// Put back what [`Self::save_adaptive_state`] returned.
    pub fn restore_adaptive_state(&mut self, section: String, state: Option<AdaptiveState>) {
        match state {
            Some(state) => {
                self.snap.adaptive.insert(section, state);
            }
            None => {
                self.snap.adaptive.remove(&section);
            }
        }
    }

    /// Adaptive section at the cursor that has not chosen an item yet.
    pub fn needs_adaptive_selection(&self) -> bool {
        let Some(current) = self.current().filter(|item| item.adaptive) else {
            return false;
        };
        match self.snap.adaptive.get(&current.section) {
            Some(state) => state.current_item_id.is_none() && !state.exhausted,
            None => true,
        }
    }

    /// Pick the session the current operation acts on.
    pub fn current_assessment_session(&mut self) -> AssessmentSession<'_> {
        let selected = self.current().filter(|item| item.adaptive).and_then(|item| {
            let state = self.snap.adaptive.get(&item.section)?;
            let id = state.current_item_id.as_deref()?;
            Some((item.section.clone(), self.test.item_ref(id)?.clone()))
        });
        if let Some((section, item_ref)) = selected {
            let session_id = self.snap.session_id.clone();
            let state = self.snap.adaptive.entry(section).or_default();
            return AssessmentSession::Adaptive(AdaptiveItemSession {
                session_id,
                session: ItemSession::new(Some(&item_ref)),
                item_ref,
                state,
            });
        }
        AssessmentSession::Regular(self)
    }
}

impl AdaptiveItemSession<'_> {
    /// Variables to transmit, with `numAttempts` overwritten by the tracked count.
    pub fn transmitted_variables(&self, attempts: u32) -> Vec<Variable> {
        let mut variables = self.session.all_variables();
        for variable in &mut variables {
            if variable.identifier == NUM_ATTEMPTS {
                variable.value = Some(Value::Single(Scalar::Integer(i64::from(attempts))));
            }
        }
        variables
    }
}
