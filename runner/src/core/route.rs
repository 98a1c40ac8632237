//! Flattened route: test parts → sections → item occurrences.
//!
//! The route is derived deterministically from the definition, so sessions
//! persist only a cursor position. An adaptive section contributes a single
//! route item whose presented item is chosen at runtime.

use std::ops::Range;

use serde::Serialize;

use crate::core::types::{NavigationMode, SubmissionMode};
use crate::definition::AssessmentTest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteItem {
    pub position: usize,
    pub test_part: String,
    pub section: String,
    /// Item ref id; for adaptive sections, the section id.
    pub item_ref: String,
    pub occurrence: u32,
    pub navigation_mode: NavigationMode,
    pub submission_mode: SubmissionMode,
    pub adaptive: bool,
    pub rubric_blocks: Vec<String>,
}

impl RouteItem {
    /// Timer key of this item occurrence.
    pub fn item_key(&self) -> String {
        format!("item:{}.{}", self.item_ref, self.occurrence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Route {
    items: Vec<RouteItem>,
}

impl Route {
    pub fn build(test: &AssessmentTest) -> Self {
        let mut items = Vec::new();
        for part in &test.test_parts {
            for section in &part.sections {
                let mut push = |item_ref: &str, occurrence: u32, adaptive: bool| {
                    items.push(RouteItem {
                        position: items.len(),
                        test_part: part.identifier.clone(),
                        section: section.identifier.clone(),
                        item_ref: item_ref.to_string(),
                        occurrence,
                        navigation_mode: part.navigation_mode,
                        submission_mode: part.submission_mode,
                        adaptive,
                        rubric_blocks: section.rubric_blocks.clone(),
                    });
                };
                if section.adaptive.is_some() {
                    push(&section.identifier, 0, true);
                    continue;
                }
                for item in &section.item_refs {
                    for occurrence in 0..item.occurrences {
                        push(&item.identifier, occurrence, false);
                    }
                }
            }
        }
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&RouteItem> {
        self.items.get(position)
    }

    pub fn items(&self) -> &[RouteItem] {
        &self.items
    }

    /// Positions sharing the section of `position`.
    pub fn section_bounds(&self, position: usize) -> Range<usize> {
        self.bounds(position, |a, b| a.test_part == b.test_part && a.section == b.section)
    }

    /// Positions sharing the test part of `position`.
    pub fn part_bounds(&self, position: usize) -> Range<usize> {
        self.bounds(position, |a, b| a.test_part == b.test_part)
    }

    fn bounds(
        &self,
        position: usize,
        same: impl Fn(&RouteItem, &RouteItem) -> bool,
    ) -> Range<usize> {
        let Some(anchor) = self.items.get(position) else {
            return position..position;
        };
        let mut start = position;
        while start > 0 && same(&self.items[start - 1], anchor) {
            start -= 1;
        }
        let mut end = position + 1;
        while end < self.items.len() && same(&self.items[end], anchor) {
            end += 1;
        }
        start..end
    }

    /// First position of `section` inside the test part of `position`.
    pub fn first_of_section(&self, position: usize, section: &str) -> Option<usize> {
        let part = self.part_bounds(position);
        part.into_iter().find(|idx| self.items[*idx].section == section)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{adaptive_section, item, part, section, test_with};

    #[test]
    fn build_flattens_parts_sections_and_occurrences() {
        let mut repeated = item("I2");
        repeated.occurrences = 2;
        let test = test_with(vec![
            part(
                "P1",
                NavigationMode::Linear,
                vec![section("S1", vec![item("I1"), repeated])],
            ),
            part("P2", NavigationMode::Nonlinear, vec![section("S2", vec![item("I3")])]),
        ]);
        let route = Route::build(&test);
        let ids: Vec<(String, u32)> = route
            .items()
            .iter()
            .map(|item| (item.item_ref.clone(), item.occurrence))
            .collect();
        assert_eq!(
            ids,
            vec![
                ("I1".to_string(), 0),
                ("I2".to_string(), 0),
                ("I2".to_string(), 1),
                ("I3".to_string(), 0)
            ]
        );
        assert_eq!(route.get(3).expect("item").navigation_mode, NavigationMode::Nonlinear);
        assert_eq!(route.get(2).expect("item").item_key(), "item:I2.1");
    }

    #[test]
    fn adaptive_section_contributes_one_route_item() {
        let test = test_with(vec![part(
            "P1",
            NavigationMode::Linear,
            vec![
                adaptive_section("CAT", vec![item("A1"), item("A2"), item("A3")]),
                section("S2", vec![item("I1")]),
            ],
        )]);
        let route = Route::build(&test);
        assert_eq!(route.len(), 2);
        let first = route.get(0).expect("item");
        assert!(first.adaptive);
        assert_eq!(first.item_ref, "CAT");
    }

    #[test]
    fn bounds_cover_section_and_part() {
        let test = test_with(vec![
            part(
                "P1",
                NavigationMode::Nonlinear,
                vec![
                    section("S1", vec![item("I1"), item("I2")]),
                    section("S2", vec![item("I3")]),
                ],
            ),
            part("P2", NavigationMode::Nonlinear, vec![section("S3", vec![item("I4")])]),
        ]);
        let route = Route::build(&test);
        assert_eq!(route.section_bounds(1), 0..2);
        assert_eq!(route.part_bounds(2), 0..3);
        assert_eq!(route.part_bounds(3), 3..4);
        assert_eq!(route.first_of_section(0, "S2"), Some(2));
        assert_eq!(route.first_of_section(0, "S3"), None);
    }
}
