//! Read-only projections of a test session for the client.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::timing::TimeConstraint;
use crate::core::types::{
    ItemSessionState, NavigationMode, SubmissionMode, TestSessionState, TimeScope,
};
use crate::io::config::RunnerConfig;
use crate::session::TestSession;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeConstraintView {
    pub scope: TimeScope,
    pub source: String,
    pub elapsed: f64,
    /// Seconds left before the maximum is exceeded.
    pub max_remaining: Option<f64>,
    /// Seconds left before the minimum is reached.
    pub min_remaining: Option<f64>,
}

impl From<&TimeConstraint> for TimeConstraintView {
    fn from(constraint: &TimeConstraint) -> Self {
        Self {
            scope: constraint.scope,
            source: constraint.source.clone(),
            elapsed: constraint.elapsed,
            max_remaining: constraint.max_remaining(),
            min_remaining: constraint.min_remaining(),
        }
    }
}

/// Snapshot handed to the client after each action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestContext {
    pub state: TestSessionState,
    pub test_title: String,
    pub navigation_mode: Option<NavigationMode>,
    pub submission_mode: Option<SubmissionMode>,
    pub test_part_id: Option<String>,
    pub section_id: Option<String>,
    pub section_title: Option<String>,
    pub item_identifier: Option<String>,
    pub item_position: Option<usize>,
    pub item_state: Option<ItemSessionState>,
    pub item_answered: bool,
    pub item_flagged: bool,
    pub attempts: u32,
    pub is_adaptive: bool,
    pub is_last: bool,
    pub can_move_backward: bool,
    pub time_constraints: Vec<TimeConstraintView>,
    pub number_items: usize,
    pub number_completed: usize,
    pub number_presented: usize,
    pub number_flagged: usize,
    pub number_rubrics: usize,
    pub allow_skipping: bool,
    pub validate_responses: bool,
    pub display_feedbacks: bool,
    pub has_feedbacks: bool,
}

/// Inputs the service resolves before building a [`TestContext`].
pub struct ContextInputs<'a> {
    pub config: &'a RunnerConfig,
    pub now: DateTime<Utc>,
    /// Completion judgment per route position.
    pub completed: &'a dyn Fn(usize) -> bool,
    pub has_feedbacks: bool,
}

pub fn test_context(session: &TestSession, inputs: &ContextInputs<'_>) -> TestContext {
    let route = session.route();
    let number_completed = (0..route.len())
        .filter(|position| (inputs.completed)(*position))
        .count();
    let number_presented = (0..route.len())
        .filter_map(|position| session.item_session(position))
        .filter(|item| item.presented)
        .count();
    let number_flagged = (0..route.len())
        .filter(|position| session.is_flagged(*position))
        .count();
    let mut context = TestContext {
        state: session.state(),
        test_title: session.test().title.clone(),
        navigation_mode: None,
        submission_mode: None,
        test_part_id: None,
        section_id: None,
        section_title: None,
        item_identifier: None,
        item_position: None,
        item_state: None,
        item_answered: false,
        item_flagged: false,
        attempts: 0,
        is_adaptive: false,
        is_last: false,
        can_move_backward: false,
        time_constraints: Vec::new(),
        number_items: route.len(),
        number_completed,
        number_presented,
        number_flagged,
        number_rubrics: 0,
        allow_skipping: true,
        validate_responses: false,
        display_feedbacks: false,
        has_feedbacks: false,
    };
    let Some(current) = session.current() else {
        return context;
    };
    let position = current.position;
    let control = session.item_control(position);
    context.navigation_mode = Some(current.navigation_mode);
    context.submission_mode = Some(current.submission_mode);
    context.test_part_id = Some(current.test_part.clone());
    context.section_id = Some(current.section.clone());
    context.section_title = session
        .test()
        .section(&current.section)
        .map(|section| section.title.clone());
    context.item_identifier = session
        .current_item_ref()
        .map(|item| item.identifier.clone());
    context.item_position = Some(position);
    if let Some(item) = session.item_session(position) {
        context.item_state = Some(item.state);
        context.attempts = item.num_attempts;
    }
    context.item_answered = (inputs.completed)(position);
    context.item_flagged = session.is_flagged(position);
    context.is_adaptive = current.adaptive;
    context.is_last = position + 1 == route.len();
    context.can_move_backward = current.navigation_mode == NavigationMode::Nonlinear
        && position > route.part_bounds(position).start;
    context.time_constraints = session
        .time_constraints(inputs.now)
        .iter()
        .map(TimeConstraintView::from)
        .collect();
    context.number_rubrics = current.rubric_blocks.len();
    context.allow_skipping = !inputs.config.enable_allow_skipping || control.allow_skipping;
    context.validate_responses =
        inputs.config.enable_validate_responses && control.validate_responses;
    context.display_feedbacks = inputs.config.force_display_feedback || control.show_feedback;
    context.has_feedbacks = inputs.has_feedbacks;
    context
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapItem {
    pub identifier: String,
    pub position: usize,
    pub occurrence: u32,
    pub state: ItemSessionState,
    pub answered: bool,
    pub flagged: bool,
    pub viewed: bool,
    pub current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapSection {
    pub identifier: String,
    pub title: String,
    pub items: Vec<MapItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapPart {
    pub identifier: String,
    pub sections: Vec<MapSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MapStats {
    pub questions: usize,
    pub answered: usize,
    pub flagged: usize,
    pub viewed: usize,
}

/// Items of the route grouped by part and section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestMap {
    /// Only the current section is listed.
    pub partial: bool,
    pub parts: Vec<MapPart>,
    pub stats: MapStats,
}

pub fn test_map(
    session: &TestSession,
    partial: bool,
    completed: &dyn Fn(usize) -> bool,
) -> TestMap {
    let route = session.route();
    let current_position = session.current().map(|item| item.position);
    let positions = match (partial, current_position) {
        (true, Some(position)) => route.section_bounds(position),
        (true, None) => 0..0,
        (false, _) => 0..route.len(),
    };
    let mut map = TestMap {
        partial,
        parts: Vec::new(),
        stats: MapStats::default(),
    };
    for position in positions {
        let route_item = &route.items()[position];
        let item_session = session.item_session(position);
        let adaptive_item = route_item
            .adaptive
            .then(|| session.adaptive_state(&route_item.section))
            .flatten()
            .and_then(|state| state.current_item_id.clone());
        let entry = MapItem {
            identifier: adaptive_item.unwrap_or_else(|| route_item.item_ref.clone()),
            position,
            occurrence: route_item.occurrence,
            state: item_session.map_or(ItemSessionState::NotSelected, |item| item.state),
            answered: completed(position),
            flagged: session.is_flagged(position),
            viewed: item_session.is_some_and(|item| item.presented),
            current: current_position == Some(position),
        };
        map.stats.questions += 1;
        map.stats.answered += usize::from(entry.answered);
        map.stats.flagged += usize::from(entry.flagged);
        map.stats.viewed += usize::from(entry.viewed);

        if map.parts.last().is_none_or(|part| part.identifier != route_item.test_part) {
            map.parts.push(MapPart {
                identifier: route_item.test_part.clone(),
                sections: Vec::new(),
            });
        }
        let Some(part) = map.parts.last_mut() else {
            continue;
        };
        if part
            .sections
            .last()
            .is_none_or(|section| section.identifier != route_item.section)
        {
            let title = session
                .test()
                .section(&route_item.section)
                .map(|section| section.title.clone())
                .unwrap_or_default();
            part.sections.push(MapSection {
                identifier: route_item.section.clone(),
                title,
                items: Vec::new(),
            });
        }
        if let Some(section) = part.sections.last_mut() {
            section.items.push(entry);
        }
    }
    map
}
