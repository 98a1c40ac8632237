//! Compiled assessment test definition, consumed read-only.

use serde::{Deserialize, Serialize};

use crate::core::types::{NavigationMode, SubmissionMode};
use crate::core::value::{BaseType, Cardinality, Value};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AssessmentTest {
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub time_limits: Option<TimeLimits>,
    #[serde(default)]
    pub outcome_declarations: Vec<VariableDeclaration>,
    pub test_parts: Vec<TestPart>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TestPart {
    pub identifier: String,
    pub navigation_mode: NavigationMode,
    pub submission_mode: SubmissionMode,
    #[serde(default)]
    pub time_limits: Option<TimeLimits>,
    #[serde(default)]
    pub item_session_control: ItemSessionControl,
    pub sections: Vec<Section>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Section {
    pub identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub time_limits: Option<TimeLimits>,
    #[serde(default)]
    pub rubric_blocks: Vec<String>,
    /// Present when items are chosen by an adaptive selector instead of authoring order.
    #[serde(default)]
    pub adaptive: Option<AdaptiveSettings>,
    pub item_refs: Vec<ItemRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AdaptiveSettings {
    /// Upper bound of items presented from the pool; unbounded when absent.
    #[serde(default)]
    pub max_items: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ItemRef {
    pub identifier: String,
    /// `itemUri|publicDir|privateDir`.
    pub href: String,
    #[serde(default)]
    pub time_limits: Option<TimeLimits>,
    #[serde(default)]
    pub response_declarations: Vec<VariableDeclaration>,
    #[serde(default)]
    pub outcome_declarations: Vec<VariableDeclaration>,
    /// Overrides the test part control when present.
    #[serde(default)]
    pub item_session_control: Option<ItemSessionControl>,
    /// Scored by a human after delivery.
    #[serde(default)]
    pub external_scored: bool,
    /// Number of times the item appears in the route.
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,
}

impl ItemRef {
    /// Item URI, the first segment of `href`.
    pub fn item_uri(&self) -> &str {
        self.href.split('|').next().unwrap_or(&self.href)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TimeLimits {
    #[serde(default)]
    pub min_time: Option<f64>,
    #[serde(default)]
    pub max_time: Option<f64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ItemSessionControl {
    /// `0` means unlimited.
    pub max_attempts: u32,
    pub show_feedback: bool,
    pub allow_skipping: bool,
    pub validate_responses: bool,
}

impl Default for ItemSessionControl {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            show_feedback: false,
            allow_skipping: true,
            validate_responses: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VariableDeclaration {
    pub identifier: String,
    pub cardinality: Cardinality,
    pub base_type: BaseType,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub correct_response: Option<Value>,
}

fn default_true() -> bool {
    true
}

fn default_occurrences() -> u32 {
    1
}

impl AssessmentTest {
    pub fn part(&self, id: &str) -> Option<&TestPart> {
        self.test_parts.iter().find(|part| part.identifier == id)
    }

    pub fn section(&self, id: &str) -> Option<&Section> {
        self.test_parts
            .iter()
            .flat_map(|part| &part.sections)
            .find(|section| section.identifier == id)
    }

    /// Look up an item ref anywhere in the test, adaptive pools included.
    pub fn item_ref(&self, id: &str) -> Option<&ItemRef> {
        self.all_item_refs().find(|item| item.identifier == id)
    }

    pub fn all_item_refs(&self) -> impl Iterator<Item = &ItemRef> {
        self.test_parts
            .iter()
            .flat_map(|part| &part.sections)
            .flat_map(|section| &section.item_refs)
    }

    /// True when any item is scored by a human after delivery.
    pub fn is_manual_scored(&self) -> bool {
        self.all_item_refs().any(|item| item.external_scored)
    }
}

/// Small linear test used by `init`-style commands and docs.
pub fn sample_test() -> AssessmentTest {
    let item = |id: &str| ItemRef {
        identifier: id.to_string(),
        href: format!("https://example.org/items/{id}|{id}-public|{id}-private"),
        time_limits: None,
        response_declarations: vec![VariableDeclaration {
            identifier: "RESPONSE".to_string(),
            cardinality: Cardinality::Single,
            base_type: BaseType::Identifier,
            default_value: None,
            correct_response: None,
        }],
        outcome_declarations: Vec::new(),
        item_session_control: None,
        external_scored: false,
        occurrences: 1,
    };
    AssessmentTest {
        identifier: "sample-test".to_string(),
        title: "Sample test".to_string(),
        time_limits: None,
        outcome_declarations: Vec::new(),
        test_parts: vec![TestPart {
            identifier: "P01".to_string(),
            navigation_mode: NavigationMode::Linear,
            submission_mode: SubmissionMode::Individual,
            time_limits: None,
            item_session_control: ItemSessionControl::default(),
            sections: vec![Section {
                identifier: "S01".to_string(),
                title: "Section 1".to_string(),
                visible: true,
                time_limits: None,
                rubric_blocks: Vec::new(),
                adaptive: None,
                item_refs: vec![item("item-1"), item("item-2")],
            }],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_uri_is_first_href_segment() {
        let test = sample_test();
        let item = test.item_ref("item-1").expect("item");
        assert_eq!(item.item_uri(), "https://example.org/items/item-1");
    }

    #[test]
    fn definition_defaults_fill_optional_fields() {
        let json = r#"{
            "identifier": "T",
            "test_parts": [{
                "identifier": "P",
                "navigation_mode": "nonlinear",
                "submission_mode": "simultaneous",
                "sections": [{
                    "identifier": "S",
                    "item_refs": [{"identifier": "I", "href": "uri|pub|priv"}]
                }]
            }]
        }"#;
        let test: AssessmentTest = serde_json::from_str(json).expect("parse");
        let section = test.section("S").expect("section");
        assert!(section.visible);
        assert!(section.adaptive.is_none());
        assert_eq!(section.item_refs[0].occurrences, 1);
        assert!(test.test_parts[0].item_session_control.allow_skipping);
        assert!(!test.is_manual_scored());
    }
}
