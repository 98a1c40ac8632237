//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::definition::{AssessmentTest, TimeLimits, VariableDeclaration};

/// Check semantic invariants of a compiled test:
/// - No duplicate part, section or item ids
/// - Every part has a section and every section an item
/// - `href` has the `itemUri|publicDir|privateDir` shape
/// - `min_time <= max_time`, both non-negative
/// - Declared defaults match the declared cardinality and base type
pub fn validate_invariants(test: &AssessmentTest) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    let root = test.identifier.as_str();
    check_limits(test.time_limits.as_ref(), root, &mut errors);
    if test.test_parts.is_empty() {
        errors.push(format!("{root}: test must have at least one test part"));
    }
    for part in &test.test_parts {
        let part_path = format!("{root}/{}", part.identifier);
        if !seen.insert(part.identifier.clone()) {
            errors.push(format!("duplicate id '{}' at {part_path}", part.identifier));
        }
        check_limits(part.time_limits.as_ref(), &part_path, &mut errors);
        if part.sections.is_empty() {
            errors.push(format!("{part_path}: test part must have at least one section"));
        }
        for section in &part.sections {
            let section_path = format!("{part_path}/{}", section.identifier);
            if !seen.insert(section.identifier.clone()) {
                errors.push(format!("duplicate id '{}' at {section_path}", section.identifier));
            }
            check_limits(section.time_limits.as_ref(), &section_path, &mut errors);
            if section.item_refs.is_empty() {
                errors.push(format!("{section_path}: section must have at least one item ref"));
            }
            for item in &section.item_refs {
                let item_path = format!("{section_path}/{}", item.identifier);
                if !seen.insert(item.identifier.clone()) {
                    errors.push(format!("duplicate id '{}' at {item_path}", item.identifier));
                }
                if item.href.split('|').count() < 3 {
                    errors.push(format!(
                        "{item_path}: href must be 'itemUri|publicDir|privateDir'"
                    ));
                }
                if item.occurrences == 0 {
                    errors.push(format!("{item_path}: occurrences must be > 0"));
                }
                check_limits(item.time_limits.as_ref(), &item_path, &mut errors);
                for decl in item.response_declarations.iter().chain(&item.outcome_declarations) {
                    check_declaration(decl, &item_path, &mut errors);
                }
            }
        }
    }
    errors
}

fn check_limits(limits: Option<&TimeLimits>, path: &str, errors: &mut Vec<String>) {
    let Some(limits) = limits else {
        return;
    };
    if limits.min_time.is_some_and(|min| min < 0.0)
        || limits.max_time.is_some_and(|max| max < 0.0)
    {
        errors.push(format!("{path}: time limits must be non-negative"));
    }
    if let (Some(min), Some(max)) = (limits.min_time, limits.max_time) {
        if min > max {
            errors.push(format!("{path}: min_time {min} exceeds max_time {max}"));
        }
    }
}

fn check_declaration(decl: &VariableDeclaration, path: &str, errors: &mut Vec<String>) {
    for (label, value) in [
        ("default_value", decl.default_value.as_ref()),
        ("correct_response", decl.correct_response.as_ref()),
    ] {
        let Some(value) = value else {
            continue;
        };
        if value.cardinality() != decl.cardinality {
            errors.push(format!(
                "{path}: {} {label} cardinality does not match declaration",
                decl.identifier
            ));
        }
    }
}
