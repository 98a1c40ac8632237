//! Per-presentation item session.

use serde::{Deserialize, Serialize};

use crate::core::response::is_responded;
use crate::core::types::ItemSessionState;
use crate::core::value::{BaseType, Cardinality, Scalar, Value, Variable, VariableKind, VariableSet};
use crate::definition::ItemRef;

pub const NUM_ATTEMPTS: &str = "numAttempts";
pub const DURATION: &str = "duration";
pub const COMPLETION_STATUS: &str = "completionStatus";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSession {
    pub state: ItemSessionState,
    pub variables: VariableSet,
    pub num_attempts: u32,
    /// Responses stored under simultaneous submission, not yet processed.
    #[serde(default)]
    pub pending: bool,
    /// The candidate has seen the item at least once.
    #[serde(default)]
    pub presented: bool,
}

impl ItemSession {
    /// Fresh session with built-in and declared variables at their defaults.
    pub fn new(item: Option<&ItemRef>) -> Self {
        let mut variables = VariableSet::new();
        let builtins = [
            builtin(NUM_ATTEMPTS, VariableKind::Response, BaseType::Integer, Scalar::Integer(0)),
            builtin(DURATION, VariableKind::Response, BaseType::Duration, Scalar::Duration(0.0)),
            builtin(
                COMPLETION_STATUS,
                VariableKind::Outcome,
                BaseType::Identifier,
                Scalar::Identifier("not_attempted".to_string()),
            ),
        ];
        for variable in builtins {
            variables.insert(variable.identifier.clone(), variable);
        }
        if let Some(item) = item {
            for decl in &item.response_declarations {
                let variable = Variable::from_declaration(decl, VariableKind::Response);
                variables.insert(variable.identifier.clone(), variable);
            }
            for decl in &item.outcome_declarations {
                let variable = Variable::from_declaration(decl, VariableKind::Outcome);
                variables.insert(variable.identifier.clone(), variable);
            }
        }
        Self {
            state: ItemSessionState::NotSelected,
            variables,
            num_attempts: 0,
            pending: false,
            presented: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == ItemSessionState::Closed
    }

    /// Copy submitted responses over declared variables and count the attempt.
    pub fn apply_responses(&mut self, responses: Vec<Variable>, duration_secs: f64) {
        for response in responses {
            if let Some(slot) = self.variables.get_mut(&response.identifier) {
                slot.value = response.value;
            }
        }
        self.num_attempts += 1;
        self.set_scalar(NUM_ATTEMPTS, Scalar::Integer(i64::from(self.num_attempts)));
        self.set_scalar(DURATION, Scalar::Duration(duration_secs));
    }

    pub fn set_scalar(&mut self, identifier: &str, scalar: Scalar) {
        if let Some(slot) = self.variables.get_mut(identifier) {
            slot.value = Some(Value::Single(scalar));
        }
    }

    pub fn variable(&self, identifier: &str) -> Option<&Variable> {
        self.variables.get(identifier)
    }

    pub fn is_responded(&self, partial: bool) -> bool {
        is_responded(self.variables.values(), partial)
    }

    /// Variables in transmission order.
    pub fn all_variables(&self) -> Vec<Variable> {
        self.variables.values().cloned().collect()
    }
}

fn builtin(identifier: &str, kind: VariableKind, base_type: BaseType, default: Scalar) -> Variable {
    let default = Some(Value::Single(default));
    Variable {
        identifier: identifier.to_string(),
        kind,
        cardinality: Cardinality::Single,
        base_type,
        value: default.clone(),
        default,
    }
}
