//! Stable exit codes for sqltree CLI commands.

/// Command succeeded; for `search`, the answer was validated by execution.
pub const OK: i32 = 0;
/// Invalid input, config or schema, or any runtime error.
pub const INVALID: i32 = 1;
/// `sqltree search` returned a candidate that never executed successfully.
pub const UNVALIDATED: i32 = 2;
