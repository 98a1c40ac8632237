//! Deterministic, pure logic shared by the runner core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures, take the current time as a parameter and return
//! deterministic outputs suitable for tests.

pub mod invariants;
pub mod item;
pub mod navigation;
pub mod response;
pub mod route;
pub mod timing;
pub mod types;
pub mod value;
