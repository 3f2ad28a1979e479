//! Stable exit codes for `shellq` commands.

/// Command succeeded. Also used for a cancel request the engine answered,
/// whatever its status code.
pub const OK: i32 = 0;
/// Invalid arguments, unreadable jobs directory or other local errors.
pub const INVALID: i32 = 1;
/// `shellq cancel` got no reply from the control endpoint.
pub const UNREACHABLE: i32 = 2;
