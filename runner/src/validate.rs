//! Validation helpers for compiled definitions and runner configuration.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::core::route::Route;
use crate::definition::AssessmentTest;
use crate::io::config::{RunnerConfig, load_config};
use crate::io::definition_store::load_definition;

/// Shape of a definition that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSummary {
    pub identifier: String,
    pub test_parts: usize,
    pub sections: usize,
    pub adaptive_sections: usize,
    /// Item refs declared, adaptive pools included.
    pub item_refs: usize,
    pub route_items: usize,
}

/// Load `path` (schema + invariants) and check that it yields a non-empty route.
pub fn validate_definition(path: &Path) -> Result<(AssessmentTest, DefinitionSummary)> {
    let test = load_definition(path)?;
    let route = Route::build(&test);
    if route.is_empty() {
        bail!("definition {} yields an empty route", path.display());
    }
    let sections = test.test_parts.iter().flat_map(|part| &part.sections);
    let summary = DefinitionSummary {
        identifier: test.identifier.clone(),
        test_parts: test.test_parts.len(),
        sections: sections.clone().count(),
        adaptive_sections: sections.filter(|section| section.adaptive.is_some()).count(),
        item_refs: test.all_item_refs().count(),
        route_items: route.len(),
    };
    Ok((test, summary))
}

/// Load an optional `runner.toml`; absent means defaults.
pub fn validate_config(path: Option<&Path>) -> Result<RunnerConfig> {
    match path {
        Some(path) => load_config(path).with_context(|| format!("load {}", path.display())),
        None => Ok(RunnerConfig::default()),
    }
}
