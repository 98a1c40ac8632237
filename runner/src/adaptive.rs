//! Adaptive (CAT) section bookkeeping and the item selector seam.
//!
//! The selector strategy is opaque. The session only records what it returns:
//! the current item, the set of seen items, attempt counters and the last
//! scored result per item.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::value::Variable;
use crate::definition::Section;

/// Scored result recorded after an adaptive attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: String,
    pub score: Variable,
    pub recorded_at: DateTime<Utc>,
}

/// Candidate history for one adaptive section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveState {
    pub current_item_id: Option<String>,
    pub seen_item_ids: BTreeSet<String>,
    pub attempts_by_item_id: BTreeMap<String, u32>,
    pub last_output: BTreeMap<String, ItemResult>,
    /// The selector returned nothing; the section is done.
    #[serde(default)]
    pub exhausted: bool,
}

impl AdaptiveState {
    /// Record a selector answer.
    pub fn record_selection(&mut self, next: Option<String>) {
        match next {
            Some(id) => {
                self.seen_item_ids.insert(id.clone());
                self.current_item_id = Some(id);
            }
            None => {
                self.current_item_id = None;
                self.exhausted = true;
            }
        }
    }

    pub fn attempts(&self, item_id: &str) -> u32 {
        self.attempts_by_item_id.get(item_id).copied().unwrap_or(0)
    }

    /// Bump and return the attempt counter of `item_id`.
    pub fn increment_attempts(&mut self, item_id: &str) -> u32 {
        let counter = self.attempts_by_item_id.entry(item_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// Input handed to an [`AdaptiveItemSelector`].
#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub session_id: &'a str,
    pub section: &'a Section,
    pub state: &'a AdaptiveState,
}

/// Chooses the next item of an adaptive section. `None` means the section is exhausted.
pub trait AdaptiveItemSelector: Send + Sync {
    fn select_next(&self, request: &SelectionRequest<'_>) -> Option<String>;
}

/// Presents unseen pool items in authoring order, bounded by `max_items`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialSelector;

impl AdaptiveItemSelector for SequentialSelector {
    fn select_next(&self, request: &SelectionRequest<'_>) -> Option<String> {
        let state = request.state;
        let limit = request
            .section
            .adaptive
            .as_ref()
            .and_then(|settings| settings.max_items);
        if limit.is_some_and(|max| state.seen_item_ids.len() >= max) {
            return None;
        }
        request
            .section
            .item_refs
            .iter()
            .map(|item| item.identifier.as_str())
            .find(|id| !state.seen_item_ids.contains(*id))
            .map(str::to_string)
    }
}
