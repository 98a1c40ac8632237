//! Destination computation for navigation requests.
//!
//! Pure function of the route and cursor. Mode rules: LINEAR parts reject
//! `previous` and `jump`; backward moves and jumps never leave the current
//! test part.

use crate::core::route::Route;
use crate::core::types::{Direction, NavScope, NavigationMode};
use crate::error::{Result, RunnerError};

/// Where a navigation request lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Position(usize),
    /// Past the last route item; the session ends.
    EndOfRoute,
}

fn forward(route: &Route, next: usize) -> Destination {
    if next < route.len() {
        Destination::Position(next)
    } else {
        Destination::EndOfRoute
    }
}

/// Compute the destination of `direction`/`scope` from `position`.
///
/// `target` is a route position for item jumps and a section id for section jumps.
pub fn destination(
    route: &Route,
    position: usize,
    direction: Direction,
    scope: NavScope,
    target: Option<&str>,
) -> Result<Destination> {
    let current = route
        .get(position)
        .ok_or_else(|| {
            RunnerError::inconsistent(format!("route position {position} out of range"))
        })?;
    if current.navigation_mode == NavigationMode::Linear
        && matches!(direction, Direction::Previous | Direction::Jump)
    {
        return Err(RunnerError::rejected(format!(
            "'{}' is not allowed in linear test part '{}'",
            direction_name(direction),
            current.test_part
        )));
    }
    match (direction, scope) {
        (Direction::Next | Direction::Skip, NavScope::Item) => Ok(forward(route, position + 1)),
        (Direction::Next | Direction::Skip, NavScope::Section) => {
            Ok(forward(route, route.section_bounds(position).end))
        }
        (Direction::Next | Direction::Skip, NavScope::TestPart) => {
            Ok(forward(route, route.part_bounds(position).end))
        }
        (Direction::Previous, NavScope::Item) => {
            let part = route.part_bounds(position);
            if position == part.start {
                return Err(RunnerError::rejected("no previous item in the current test part"));
            }
            Ok(Destination::Position(position - 1))
        }
        (Direction::Previous, NavScope::Section) => {
            let part = route.part_bounds(position);
            let section = route.section_bounds(position);
            if section.start == part.start {
                return Err(RunnerError::rejected("no previous section in the current test part"));
            }
            Ok(Destination::Position(route.section_bounds(section.start - 1).start))
        }
        (Direction::Previous, NavScope::TestPart) => Err(RunnerError::rejected(
            "moving back to a previous test part is not allowed",
        )),
        (Direction::Jump, NavScope::Item) => {
            let raw =
                target.ok_or_else(|| RunnerError::rejected("jump requires a target position"))?;
            let to: usize = raw
                .parse()
                .map_err(|_| RunnerError::rejected(format!("invalid jump position '{raw}'")))?;
            if !route.part_bounds(position).contains(&to) {
                return Err(RunnerError::rejected(format!(
                    "jump position {to} is outside the current test part"
                )));
            }
            Ok(Destination::Position(to))
        }
        (Direction::Jump, NavScope::Section) => {
            let section =
                target.ok_or_else(|| RunnerError::rejected("jump requires a target section"))?;
            route
                .first_of_section(position, section)
                .map(Destination::Position)
                .ok_or_else(|| {
                    RunnerError::rejected(format!(
                        "section '{section}' is not part of the current test part"
                    ))
                })
        }
        (Direction::Jump, NavScope::TestPart) => {
            let part =
                target.ok_or_else(|| RunnerError::rejected("jump requires a target test part"))?;
            if part != current.test_part {
                return Err(RunnerError::rejected(format!(
                    "jumping to test part '{part}' leaves the current test part"
                )));
            }
            Ok(Destination::Position(route.part_bounds(position).start))
        }
    }
}

fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Next => "next",
        Direction::Previous => "previous",
        Direction::Jump => "jump",
        Direction::Skip => "skip",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{item, part, section, test_with};

    fn nonlinear_route() -> Route {
        Route::build(&test_with(vec![
            part(
                "P1",
                NavigationMode::Nonlinear,
                vec![
                    section("S1", vec![item("I1"), item("I2")]),
                    section("S2", vec![item("I3"), item("I4")]),
                ],
            ),
            part("P2", NavigationMode::Nonlinear, vec![section("S3", vec![item("I5")])]),
        ]))
    }

    fn linear_route() -> Route {
        Route::build(&test_with(vec![part(
            "P1",
            NavigationMode::Linear,
            vec![section("S1", vec![item("I1"), item("I2")])],
        )]))
    }

    #[test]
    fn linear_rejects_previous_and_jump() {
        let route = linear_route();
        let err = destination(&route, 1, Direction::Previous, NavScope::Item, None)
            .expect_err("previous rejected");
        assert!(matches!(err, RunnerError::NavigationRejected(_)));
        assert!(destination(&route, 0, Direction::Jump, NavScope::Item, Some("1")).is_err());
    }

    #[test]
    fn next_past_last_item_ends_route() {
        let route = linear_route();
        assert_eq!(
            destination(&route, 1, Direction::Next, NavScope::Item, None).expect("next"),
            Destination::EndOfRoute
        );
        assert_eq!(
            destination(&route, 0, Direction::Skip, NavScope::Item, None).expect("skip"),
            Destination::Position(1)
        );
    }

    #[test]
    fn section_and_part_scopes_skip_remaining_items() {
        let route = nonlinear_route();
        assert_eq!(
            destination(&route, 0, Direction::Next, NavScope::Section, None).expect("next section"),
            Destination::Position(2)
        );
        assert_eq!(
            destination(&route, 1, Direction::Next, NavScope::TestPart, None).expect("next part"),
            Destination::Position(4)
        );
    }

    #[test]
    fn previous_stays_within_test_part() {
        let route = nonlinear_route();
        assert_eq!(
            destination(&route, 3, Direction::Previous, NavScope::Item, None).expect("previous"),
            Destination::Position(2)
        );
        assert_eq!(
            destination(&route, 3, Direction::Previous, NavScope::Section, None)
                .expect("previous section"),
            Destination::Position(0)
        );
        assert!(destination(&route, 4, Direction::Previous, NavScope::Item, None).is_err());
    }

    #[test]
    fn jumps_resolve_positions_and_sections() {
        let route = nonlinear_route();
        assert_eq!(
            destination(&route, 0, Direction::Jump, NavScope::Item, Some("3")).expect("jump"),
            Destination::Position(3)
        );
        assert_eq!(
            destination(&route, 0, Direction::Jump, NavScope::Section, Some("S2"))
                .expect("jump section"),
            Destination::Position(2)
        );
        assert!(destination(&route, 0, Direction::Jump, NavScope::Item, Some("4")).is_err());
        assert!(destination(&route, 0, Direction::Jump, NavScope::Section, Some("S3")).is_err());
    }
}
