//! Response processing seam.
//!
//! Scoring rules are evaluated elsewhere; the session only triggers them once
//! an attempt ends and reads the outcomes back from the item session.

use crate::core::item::{COMPLETION_STATUS, ItemSession};
use crate::core::value::{Scalar, values_equal};
use crate::definition::ItemRef;

pub const SCORE: &str = "SCORE";

/// Runs response processing for one item session.
pub trait ItemScoring: Send + Sync {
    fn process(&self, item: &ItemRef, session: &mut ItemSession);
}

/// Leaves outcomes untouched apart from the completion status.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScoring;

impl ItemScoring for NoScoring {
    fn process(&self, _item: &ItemRef, session: &mut ItemSession) {
        mark_completed(session);
    }
}

/// QTI `match_correct` template: `SCORE` is 1 when every response with a
/// correct response declared matches it, 0 otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchCorrect;

impl ItemScoring for MatchCorrect {
    fn process(&self, item: &ItemRef, session: &mut ItemSession) {
        let mut keyed = item
            .response_declarations
            .iter()
            .filter(|decl| decl.correct_response.is_some())
            .peekable();
        if keyed.peek().is_some() {
            let correct = keyed.all(|decl| {
                let value = session
                    .variable(&decl.identifier)
                    .and_then(|variable| variable.value.as_ref());
                values_equal(value, decl.correct_response.as_ref())
            });
            session.set_scalar(SCORE, Scalar::Float(if correct { 1.0 } else { 0.0 }));
        }
        mark_completed(session);
    }
}

fn mark_completed(session: &mut ItemSession) {
    session.set_scalar(COMPLETION_STATUS, Scalar::Identifier("completed".to_string()));
}
