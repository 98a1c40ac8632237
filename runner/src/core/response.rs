//! Client response payloads and completion judgments.
//!
//! Payload entries use the portable JSON encoding:
//! `{"base": {"identifier": "A"}}`, `{"base": null}`,
//! `{"list": {"identifier": ["A", "B"]}}`.

use serde_json::{Map, Value as Json};
use tracing::debug;

use crate::core::value::{BaseType, Cardinality, FileValue, Scalar, Value, Variable, VariableKind};
use crate::definition::VariableDeclaration;

/// Variables never considered when judging completion.
pub const EXCLUDED_FROM_COMPLETION: [&str; 2] = ["numAttempts", "duration"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillError {
    /// The identifier is not declared on the item.
    OutOfBounds(String),
    /// The value does not fit the declaration.
    OutOfRange { identifier: String, reason: String },
}

/// Convert one client entry into a typed response variable.
pub fn fill_variable(
    declarations: &[VariableDeclaration],
    identifier: &str,
    raw: &Json,
) -> Result<Variable, FillError> {
    let decl = declarations
        .iter()
        .find(|decl| decl.identifier == identifier)
        .ok_or_else(|| FillError::OutOfBounds(identifier.to_string()))?;
    let out_of_range = |reason: String| FillError::OutOfRange {
        identifier: identifier.to_string(),
        reason,
    };
    let value = decode_value(decl, raw).map_err(out_of_range)?;
    let mut variable = Variable::from_declaration(decl, VariableKind::Response);
    variable.value = value;
    Ok(variable)
}

fn decode_value(decl: &VariableDeclaration, raw: &Json) -> Result<Option<Value>, String> {
    let Some(object) = raw.as_object() else {
        return Err("payload entry must be an object".to_string());
    };
    if let Some(base) = object.get("base") {
        if decl.cardinality != Cardinality::Single {
            return Err("'base' payload for a container variable".to_string());
        }
        if base.is_null() {
            return Ok(None);
        }
        let scalar = decode_typed(decl.base_type, base)?;
        return Ok(Some(Value::Single(scalar)));
    }
    if let Some(list) = object.get("list") {
        if decl.cardinality == Cardinality::Single {
            return Err("'list' payload for a single variable".to_string());
        }
        if list.is_null() {
            return Ok(None);
        }
        let entries = typed_entry(decl.base_type, list)?
            .as_array()
            .ok_or_else(|| "list values must be an array".to_string())?;
        let scalars = entries
            .iter()
            .map(|entry| decode_scalar(decl.base_type, entry))
            .collect::<Result<Vec<_>, _>>()?;
        let value = match decl.cardinality {
            Cardinality::Ordered => Value::Ordered(scalars),
            _ => Value::Multiple(scalars),
        };
        return Ok(Some(value));
    }
    if object.contains_key("record") {
        return Err("record cardinality is not supported".to_string());
    }
    Err("expected 'base' or 'list'".to_string())
}

fn typed_entry<'a>(base_type: BaseType, payload: &'a Json) -> Result<&'a Json, String> {
    let map: &Map<String, Json> = payload
        .as_object()
        .ok_or_else(|| "typed payload must be an object".to_string())?;
    map.get(base_type.as_str())
        .ok_or_else(|| format!("expected base type '{}'", base_type.as_str()))
}

fn decode_typed(base_type: BaseType, payload: &Json) -> Result<Scalar, String> {
    let entry = typed_entry(base_type, payload)?;
    decode_scalar(base_type, entry)
}

fn decode_scalar(base_type: BaseType, raw: &Json) -> Result<Scalar, String> {
    let invalid = || format!("invalid {} value {raw}", base_type.as_str());
    let scalar = match base_type {
        BaseType::Identifier => Scalar::Identifier(raw.as_str().ok_or_else(invalid)?.to_string()),
        BaseType::String => Scalar::String(raw.as_str().ok_or_else(invalid)?.to_string()),
        BaseType::Uri => Scalar::Uri(raw.as_str().ok_or_else(invalid)?.to_string()),
        BaseType::Boolean => match raw {
            Json::Bool(flag) => Scalar::Boolean(*flag),
            Json::String(text) if text == "true" => Scalar::Boolean(true),
            Json::String(text) if text == "false" => Scalar::Boolean(false),
            _ => return Err(invalid()),
        },
        BaseType::Integer => Scalar::Integer(match raw {
            Json::Number(num) => num.as_i64().ok_or_else(invalid)?,
            Json::String(text) => text.trim().parse().map_err(|_| invalid())?,
            _ => return Err(invalid()),
        }),
        BaseType::Float => Scalar::Float(number(raw).ok_or_else(invalid)?),
        BaseType::Duration => Scalar::Duration(number(raw).ok_or_else(invalid)?),
        BaseType::Point => {
            let pair = pair_of(raw).ok_or_else(invalid)?;
            let x = pair[0].as_i64().ok_or_else(invalid)?;
            let y = pair[1].as_i64().ok_or_else(invalid)?;
            Scalar::Point([x, y])
        }
        BaseType::Pair | BaseType::DirectedPair => {
            let pair = pair_of(raw).ok_or_else(invalid)?;
            let a = pair[0].as_str().ok_or_else(invalid)?.to_string();
            let b = pair[1].as_str().ok_or_else(invalid)?.to_string();
            if base_type == BaseType::Pair {
                Scalar::Pair([a, b])
            } else {
                Scalar::DirectedPair([a, b])
            }
        }
        BaseType::File => {
            let file: FileValue = serde_json::from_value(raw.clone()).map_err(|_| invalid())?;
            Scalar::File(file)
        }
    };
    Ok(scalar)
}

fn number(raw: &Json) -> Option<f64> {
    match raw {
        Json::Number(num) => num.as_f64(),
        Json::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn pair_of(raw: &Json) -> Option<&[Json]> {
    raw.as_array()
        .map(Vec::as_slice)
        .filter(|items| items.len() == 2)
}

/// Convert a whole payload. Bad entries are logged and skipped, file placeholders dropped.
pub fn parse_responses(declarations: &[VariableDeclaration], payload: &Json) -> Vec<Variable> {
    let Some(entries) = payload.as_object() else {
        debug!("response payload is not an object");
        return Vec::new();
    };
    let mut variables = Vec::new();
    for (identifier, raw) in entries {
        match fill_variable(declarations, identifier, raw) {
            Ok(variable) => {
                if variable.value.as_ref().is_some_and(Value::is_file_placeholder) {
                    continue;
                }
                variables.push(variable);
            }
            Err(FillError::OutOfRange { identifier, reason }) => {
                debug!(
                    identifier = %identifier,
                    reason = %reason,
                    "could not convert client-side value"
                );
            }
            Err(FillError::OutOfBounds(identifier)) => {
                debug!(identifier = %identifier, "variable not declared on current item");
            }
        }
    }
    variables
}

/// Rebuild a payload from a persisted item state (`{id: {"response": ...}}`).
pub fn payload_from_item_state(state: &Json) -> Json {
    let mut payload = Map::new();
    if let Some(entries) = state.as_object() {
        for (identifier, entry) in entries {
            if let Some(response) = entry.get("response") {
                payload.insert(identifier.clone(), response.clone());
            }
        }
    }
    Json::Object(payload)
}

fn counted<'a>(
    variables: impl IntoIterator<Item = &'a Variable>,
) -> impl Iterator<Item = &'a Variable> {
    variables.into_iter().filter(|variable| {
        variable.kind == VariableKind::Response
            && !EXCLUDED_FROM_COMPLETION.contains(&variable.identifier.as_str())
    })
}

/// Completion judgment over response variables.
///
/// With `partial`, any counted variable differing from its default answers the
/// item. Without it, every counted variable must differ.
pub fn is_responded<'a>(variables: impl IntoIterator<Item = &'a Variable>, partial: bool) -> bool {
    for variable in counted(variables) {
        let value_null = variable.is_null();
        let default_null = crate::core::value::is_null(variable.default.as_ref());
        if value_null {
            if partial && !default_null {
                return true;
            }
            if !partial && default_null {
                return false;
            }
        } else {
            let equal = variable.equals_default();
            if partial && !equal {
                return true;
            }
            if !partial && equal {
                return false;
            }
        }
    }
    !partial
}

/// True when every variable is null-equivalent to, or equal to, its default.
pub fn is_empty_response(variables: &[Variable]) -> bool {
    let similar = variables
        .iter()
        .filter(|variable| {
            if variable.is_null() {
                crate::core::value::is_null(variable.default.as_ref())
            } else {
                variable.equals_default()
            }
        })
        .count();
    !variables.is_empty() && similar == variables.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decl(id: &str, cardinality: Cardinality, base_type: BaseType) -> VariableDeclaration {
        VariableDeclaration {
            identifier: id.to_string(),
            cardinality,
            base_type,
            default_value: None,
            correct_response: None,
        }
    }

    fn response(id: &str, value: Option<Value>, default: Option<Value>) -> Variable {
        Variable {
            identifier: id.to_string(),
            kind: VariableKind::Response,
            cardinality: Cardinality::Single,
            base_type: BaseType::Identifier,
            value,
            default,
        }
    }

    fn ident(id: &str) -> Option<Value> {
        Some(Value::Single(Scalar::Identifier(id.to_string())))
    }

    #[test]
    fn parse_fills_base_and_list_values() {
        let decls = vec![
            decl("RESPONSE", Cardinality::Single, BaseType::Identifier),
            decl("CHOICES", Cardinality::Multiple, BaseType::Identifier),
        ];
        let payload = json!({
            "RESPONSE": {"base": {"identifier": "A"}},
            "CHOICES": {"list": {"identifier": ["B", "C"]}}
        });
        let vars = parse_responses(&decls, &payload);
        assert_eq!(vars.len(), 2);
        let choices = vars.iter().find(|v| v.identifier == "CHOICES").expect("choices");
        assert_eq!(
            choices.value,
            Some(Value::Multiple(vec![
                Scalar::Identifier("B".to_string()),
                Scalar::Identifier("C".to_string())
            ]))
        );
    }

    /// Undeclared identifiers and mistyped values are skipped without failing the batch.
    #[test]
    fn parse_skips_unknown_and_out_of_range_entries() {
        let decls = vec![
            decl("RESPONSE", Cardinality::Single, BaseType::Integer),
            decl("OTHER", Cardinality::Single, BaseType::String),
        ];
        let payload = json!({
            "RESPONSE": {"base": {"integer": "not a number"}},
            "UNKNOWN": {"base": {"string": "x"}},
            "OTHER": {"base": {"string": "kept"}}
        });
        let vars = parse_responses(&decls, &payload);
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].identifier, "OTHER");
    }

    #[test]
    fn parse_drops_file_placeholders() {
        let decls = vec![decl("UPLOAD", Cardinality::Single, BaseType::File)];
        let payload = json!({
            "UPLOAD": {"base": {"file": {"mime": "qti/x-file-placeholder", "data": ""}}}
        });
        assert!(parse_responses(&decls, &payload).is_empty());
    }

    #[test]
    fn fill_reports_out_of_bounds_and_range() {
        let decls = vec![decl("RESPONSE", Cardinality::Single, BaseType::Boolean)];
        assert_eq!(
            fill_variable(&decls, "MISSING", &json!({"base": null})),
            Err(FillError::OutOfBounds("MISSING".to_string()))
        );
        assert!(matches!(
            fill_variable(&decls, "RESPONSE", &json!({"base": {"integer": 1}})),
            Err(FillError::OutOfRange { .. })
        ));
        let null = fill_variable(&decls, "RESPONSE", &json!({"base": null})).expect("fill");
        assert!(null.is_null());
    }

    #[test]
    fn both_defaults_means_not_completed_when_partial() {
        let vars = vec![
            response("R1", ident("A"), ident("A")),
            response("R2", ident("B"), ident("B")),
        ];
        assert!(!is_responded(&vars, true));
    }

    #[test]
    fn one_difference_completes_only_when_partial() {
        let vars = vec![
            response("R1", ident("X"), ident("A")),
            response("R2", ident("B"), ident("B")),
        ];
        assert!(is_responded(&vars, true));
        assert!(!is_responded(&vars, false));
    }

    #[test]
    fn every_difference_completes_without_partial() {
        let vars = vec![
            response("R1", ident("X"), ident("A")),
            response("R2", ident("Y"), ident("B")),
        ];
        assert!(is_responded(&vars, false));
    }

    #[test]
    fn null_value_with_null_default_blocks_full_completion() {
        let vars = vec![response("R1", ident("X"), None), response("R2", None, None)];
        assert!(is_responded(&vars, true));
        assert!(!is_responded(&vars, false));
    }

    #[test]
    fn excluded_variables_are_ignored() {
        let mut attempts = response("numAttempts", None, None);
        attempts.value = Some(Value::Single(Scalar::Integer(3)));
        let vars = vec![attempts, response("R1", None, None)];
        assert!(!is_responded(&vars, true));
    }

    #[test]
    fn empty_response_requires_every_variable_at_default() {
        let at_default = vec![response("R1", None, None), response("R2", ident("A"), ident("A"))];
        assert!(is_empty_response(&at_default));
        let answered = vec![response("R1", ident("A"), None)];
        assert!(!is_empty_response(&answered));
        let null_against_default = vec![response("R1", None, ident("A"))];
        assert!(!is_empty_response(&null_against_default));
        assert!(!is_empty_response(&[]));
    }

    #[test]
    fn item_state_payload_keeps_response_fields() {
        let state = json!({
            "RESPONSE": {"response": {"base": {"identifier": "A"}}},
            "NOTES": {"text": "ignored"}
        });
        let payload = payload_from_item_state(&state);
        assert_eq!(payload, json!({"RESPONSE": {"base": {"identifier": "A"}}}));
    }
}
