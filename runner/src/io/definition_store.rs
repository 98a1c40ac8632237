//! Compiled test definition loading with schema + invariant validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::definition::AssessmentTest;

pub const V1_SCHEMA: &str = include_str!("../../../schemas/assessment_test/v1.schema.json");

/// Load and validate a definition from disk against the bundled schema.
pub fn load_definition(path: &Path) -> Result<AssessmentTest> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read definition {}", path.display()))?;
    let test = parse_definition(&raw, V1_SCHEMA)
        .with_context(|| format!("validate definition {}", path.display()))?;
    debug!(path = %path.display(), test = %test.identifier, "definition loaded");
    Ok(test)
}

/// Parse and validate a definition: schema conformance + semantic invariants.
pub fn parse_definition(raw: &str, schema_raw: &str) -> Result<AssessmentTest> {
    let instance: Value = serde_json::from_str(raw).context("parse definition json")?;
    let schema: Value = serde_json::from_str(schema_raw).context("parse schema json")?;
    validate_schema(&instance, &schema)?;
    let test: AssessmentTest =
        serde_json::from_value(instance).context("parse definition as v1 struct")?;
    let errors = validate_invariants(&test);
    if !errors.is_empty() {
        bail!("invariant violations:\n- {}", errors.join("\n- "));
    }
    Ok(test)
}

/// Write a definition with stable formatting.
pub fn write_definition(path: &Path, test: &AssessmentTest) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(test)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write definition {}", path.display()))
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile json schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
