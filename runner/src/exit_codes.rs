//! Stable exit codes for runner CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to an invalid definition, script, config or store.
pub const INVALID: i32 = 1;
/// `runner play` finished but at least one action was refused.
pub const REFUSED: i32 = 2;
