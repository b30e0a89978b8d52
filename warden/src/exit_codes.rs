//! Stable exit codes for `warden` CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Storage, process, or tool failure.
pub const FAILED: i32 = 1;
/// A path was rejected by validation.
pub const REJECTED: i32 = 2;
/// A one-shot request exceeded its deadline.
pub const TIMEOUT: i32 = 3;
/// Invalid configuration, workspace, or usage.
pub const INVALID: i32 = 4;

/// Exit code for a failure reported by its machine code, as carried in RPC responses.
pub fn for_code(code: &str) -> i32 {
    match code {
        "EMPTY_PATH" | "PATH_OUTSIDE_WORKSPACE" | "SYMLINK_LOOP" => REJECTED,
        "REQUEST_TIMEOUT" => TIMEOUT,
        "INVALID_WORKSPACE" | "WORKSPACE_NOT_SELECTED" => INVALID,
        _ => FAILED,
    }
}
