//! Shared deterministic types for runner core logic.
//!
//! These types define stable contracts between core components and the
//! service layer. They carry no I/O and serialize to stable names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::value::Variable;

/// Lifecycle state of a test session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSessionState {
    Initial,
    Interacting,
    ModalFeedback,
    Suspended,
    Closed,
}

/// Lifecycle state of one item presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemSessionState {
    NotSelected,
    Initial,
    Interacting,
    ModalFeedback,
    Suspended,
    Closed,
    Solution,
    Review,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationMode {
    Linear,
    Nonlinear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    Individual,
    Simultaneous,
}

/// Requested navigation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Next,
    Previous,
    Jump,
    Skip,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(Self::Next),
            "previous" => Ok(Self::Previous),
            "jump" => Ok(Self::Jump),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// Granularity of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavScope {
    #[serde(rename = "item")]
    Item,
    #[serde(rename = "section")]
    Section,
    #[serde(rename = "testPart")]
    TestPart,
}

impl FromStr for NavScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "item" => Ok(Self::Item),
            "section" => Ok(Self::Section),
            "testPart" => Ok(Self::TestPart),
            other => Err(format!("unknown navigation scope '{other}'")),
        }
    }
}

/// Scope of a time constraint, ordered by timeout precedence (test first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeScope {
    #[serde(rename = "assessmentTest")]
    Test,
    #[serde(rename = "testPart")]
    TestPart,
    #[serde(rename = "assessmentSection")]
    Section,
    #[serde(rename = "assessmentItemRef")]
    Item,
}

impl TimeScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Test => "assessmentTest",
            Self::TestPart => "testPart",
            Self::Section => "assessmentSection",
            Self::Item => "assessmentItemRef",
        }
    }

    /// Parse a client-supplied scope name. Unknown names denote an item.
    pub fn from_client(name: &str) -> Self {
        match name {
            "assessmentTest" => Self::Test,
            "testPart" => Self::TestPart,
            "assessmentSection" => Self::Section,
            _ => Self::Item,
        }
    }
}

impl fmt::Display for TimeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status recorded on the delivery execution when a session finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Active,
    Paused,
    Finished,
    Terminated,
}

/// Result of a navigation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The cursor moved (or the session finished at the end of the route).
    Advanced,
    /// A duration overflow was detected and recovery already moved the session.
    OverflowHandled(TimeScope),
    /// The request was refused; the route is unchanged.
    Failed(String),
}

impl MoveOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Ordered notification emitted by a runner operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    SessionBegun {
        session_id: String,
    },
    SessionSuspended {
        session_id: String,
    },
    SessionResumed {
        session_id: String,
    },
    ContinueInteraction {
        session_id: String,
        position: usize,
    },
    SessionTimedOut {
        session_id: String,
        scope: TimeScope,
        /// False before recovery runs, true once it has.
        handled: bool,
    },
    SessionExited {
        session_id: String,
    },
    SessionClosed {
        session_id: String,
        user_uri: Option<String>,
    },
    DeliveryExecutionFinished {
        execution_uri: String,
        state: DeliveryState,
        outcomes: Vec<Variable>,
        manual_scored: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_scope_orders_test_before_item() {
        let mut scopes = vec![
            TimeScope::Item,
            TimeScope::Test,
            TimeScope::Section,
            TimeScope::TestPart,
        ];
        scopes.sort();
        assert_eq!(
            scopes,
            vec![
                TimeScope::Test,
                TimeScope::TestPart,
                TimeScope::Section,
                TimeScope::Item
            ]
        );
    }

    #[test]
    fn unknown_client_scope_maps_to_item() {
        assert_eq!(TimeScope::from_client("testPart"), TimeScope::TestPart);
        assert_eq!(TimeScope::from_client("whatever"), TimeScope::Item);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = DomainEvent::SessionBegun {
            session_id: "exec-1".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "session_begun");
        assert_eq!(json["session_id"], "exec-1");
    }

    #[test]
    fn parse_direction_and_scope() {
        assert_eq!("skip".parse::<Direction>(), Ok(Direction::Skip));
        assert_eq!("testPart".parse::<NavScope>(), Ok(NavScope::TestPart));
        assert!("sideways".parse::<Direction>().is_err());
    }
}
