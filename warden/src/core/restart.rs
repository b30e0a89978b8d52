//! Automatic restart decisions for the supervised process.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub max_restarts: u32,
    pub delay: Duration,
}

/// How the supervisor should react to a process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitAction {
    /// Clean exit: the restart counter returns to zero.
    ResetCounter,
    /// Schedule restart number `attempt` after `delay`.
    Restart { attempt: u32, delay: Duration },
    /// Stay stopped and keep the counter as is.
    StayStopped,
}

/// Decide what follows an exit.
///
/// A restart requires an abnormal exit of a process that was `Running` (not one
/// being stopped), an enabled policy, and a counter below the cap.
pub fn on_exit(
    policy: &RestartPolicy,
    exit_code: Option<i32>,
    was_running: bool,
    restart_count: u32,
) -> ExitAction {
    if exit_code == Some(0) {
        return ExitAction::ResetCounter;
    }
    if was_running && policy.enabled && restart_count < policy.max_restarts {
        return ExitAction::Restart {
            attempt: restart_count + 1,
            delay: policy.delay,
        };
    }
    ExitAction::StayStopped
}
