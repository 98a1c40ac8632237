//! Assessment test-session runner.
//!
//! Drives a candidate through a compiled assessment test: navigation along a
//! flattened route, timing constraints and timeout recovery, response
//! submission and transmission, adaptive item selection, and persistence of
//! the session between requests. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (route, navigation, timing,
//!   response parsing, item sessions). No I/O, time passed in.
//! - **[`io`]**: Collaborators with side effects (key-value storage, result
//!   transmission, compiled package access, clock, events).
//!
//! [`session`] owns the state of one test session; [`service`] orchestrates
//! it against the collaborators and is the entry point of every candidate
//! action. [`play`] and [`validate`] back the CLI.

pub mod adaptive;
pub mod context;
pub mod core;
pub mod definition;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod play;
pub mod scoring;
pub mod service;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
pub mod views;
