//! One-shot execution against scripted stand-ins for the external tool.
//!
//! Each fake tool appends its `--model` argument to `calls.log` so tests can
//! count invocations.
#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use nix::sys::signal::kill;
use nix::unistd::Pid;
use warden::error::SandboxError;
use warden::io::config::ToolConfig;
use warden::io::events::{EventBus, GatewayEvent, NoticeKind};
use warden::io::execution::ExecutionGateway;
use warden::test_support::write_fake_tool;

/// Records the value following `--model`, then runs `body`.
fn scripted_tool(dir: &Path, body: &str) -> PathBuf {
    let log = dir.join("calls.log");
    let script = format!(
        concat!(
            "model=\"\"\n",
            "while [ $# -gt 0 ]; do\n",
            "  if [ \"$1\" = \"--model\" ]; then model=\"$2\"; fi\n",
            "  shift\n",
            "done\n",
            "echo \"$model\" >> '{log}'\n",
            "{body}"
        ),
        log = log.display(),
        body = body
    );
    write_fake_tool(dir, "tool.sh", &script)
}

fn calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

fn tool(program: &Path) -> ToolConfig {
    ToolConfig {
        program: program.to_string_lossy().into_owned(),
        model: "primary".to_string(),
        fallback_model: Some("fallback".to_string()),
        timeout_secs: 10,
        ..ToolConfig::default()
    }
}

#[tokio::test]
async fn success_returns_stdout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let program = scripted_tool(temp.path(), "echo \"answer from $model\"");
    let gateway = ExecutionGateway::new(tool(&program), temp.path(), 4096, EventBus::new());

    let output = gateway.execute_prompt("question").await.expect("execute");
    assert_eq!(output.trim(), "answer from primary");
    assert_eq!(calls(temp.path()), ["primary"]);
}

#[tokio::test]
async fn capacity_error_retries_once_with_fallback() {
    let temp = tempfile::tempdir().expect("tempdir");
    let program = scripted_tool(
        temp.path(),
        concat!(
            "if [ \"$model\" = \"primary\" ]; then\n",
            "  echo 'RESOURCE_EXHAUSTED: try later' >&2\n",
            "  exit 1\n",
            "fi\n",
            "echo \"ok from $model\""
        ),
    );
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let gateway = ExecutionGateway::new(tool(&program), temp.path(), 4096, events);

    let output = gateway.execute_prompt("question").await.expect("execute");
    assert_eq!(output.trim(), "ok from fallback");
    assert_eq!(calls(temp.path()), ["primary", "fallback"]);

    let mut notices = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let GatewayEvent::Notice { kind, .. } = event {
            notices.push(kind);
        }
    }
    assert_eq!(notices, [NoticeKind::Fallback]);
}

#[tokio::test]
async fn fallback_failure_is_not_retried_again() {
    let temp = tempfile::tempdir().expect("tempdir");
    let program = scripted_tool(temp.path(), "echo 'Quota exceeded for model' >&2\nexit 1");
    let gateway = ExecutionGateway::new(tool(&program), temp.path(), 4096, EventBus::new());

    let err = gateway.execute_prompt("question").await.unwrap_err();
    assert!(matches!(err, SandboxError::CapacityExhausted { .. }), "{err}");
    assert_eq!(calls(temp.path()), ["primary", "fallback"]);
}

#[tokio::test]
async fn other_failures_are_not_retried() {
    let temp = tempfile::tempdir().expect("tempdir");
    let program = scripted_tool(temp.path(), "echo 'invalid api key' >&2\nexit 2");
    let gateway = ExecutionGateway::new(tool(&program), temp.path(), 4096, EventBus::new());

    let err = gateway.execute_prompt("question").await.unwrap_err();
    match err {
        SandboxError::ProcessExitNonZero { code, message } => {
            assert_eq!(code, Some(2));
            assert_eq!(message, "invalid api key");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls(temp.path()), ["primary"]);
}

#[tokio::test]
async fn missing_fallback_surfaces_capacity_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let program = scripted_tool(temp.path(), "echo 'rate limit reached' >&2\nexit 1");
    let mut config = tool(&program);
    config.fallback_model = None;
    let gateway = ExecutionGateway::new(config, temp.path(), 4096, EventBus::new());

    let err = gateway.execute_prompt("question").await.unwrap_err();
    assert!(matches!(err, SandboxError::CapacityExhausted { .. }), "{err}");
    assert_eq!(calls(temp.path()), ["primary"]);
}

#[tokio::test]
async fn timeout_kills_the_process() {
    let temp = tempfile::tempdir().expect("tempdir");
    let pidfile = temp.path().join("tool.pid");
    let program = scripted_tool(
        temp.path(),
        &format!("echo $$ > '{}'\necho partial\nexec sleep 30", pidfile.display()),
    );
    let mut config = tool(&program);
    config.timeout_secs = 1;
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let gateway = ExecutionGateway::new(config, temp.path(), 4096, events);

    let started = Instant::now();
    let err = gateway.execute_prompt("question").await.unwrap_err();
    let elapsed = started.elapsed();
    assert!(matches!(err, SandboxError::RequestTimeout { .. }), "{err}");
    assert!(elapsed >= Duration::from_secs(1), "settled early: {elapsed:?}");
    // Deadline, plus the reap grace for the killed tree, plus scheduling slack.
    assert!(elapsed < Duration::from_secs(5), "settled late: {elapsed:?}");
    assert_eq!(err.code(), "REQUEST_TIMEOUT");
    assert_eq!(calls(temp.path()), ["primary"]);

    let pid: i32 = fs::read_to_string(&pidfile)
        .expect("pidfile")
        .trim()
        .parse()
        .expect("pid");
    let mut gone = false;
    for _ in 0..20 {
        if kill(Pid::from_raw(pid), None).is_err() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(gone, "tool process {pid} survived the timeout");

    let mut saw_timeout_notice = false;
    while let Ok(event) = rx.try_recv() {
        if matches!(
            event,
            GatewayEvent::Notice {
                kind: NoticeKind::Timeout,
                ..
            }
        ) {
            saw_timeout_notice = true;
        }
    }
    assert!(saw_timeout_notice);
}

#[tokio::test]
async fn prompt_reaches_tool_as_single_argument() {
    let temp = tempfile::tempdir().expect("tempdir");
    let program = write_fake_tool(temp.path(), "argv.sh", "printf '%s\\n' \"$2\"");
    let gateway = ExecutionGateway::new(tool(&program), temp.path(), 4096, EventBus::new());

    let prompt = "hello; rm -rf / && echo $(id) `whoami`";
    let output = gateway.execute_prompt(prompt).await.expect("execute");
    assert_eq!(output.trim_end(), prompt);
}

/// Runs two prompts at once against a tool that logs `start`/`end` around a sleep.
async fn run_two_concurrently(single_flight: bool) -> Vec<String> {
    let temp = tempfile::tempdir().expect("tempdir");
    let events_log = temp.path().join("events.log");
    let program = scripted_tool(
        temp.path(),
        &format!(
            "echo start >> '{log}'\nsleep 1\necho end >> '{log}'\necho done",
            log = events_log.display()
        ),
    );
    let mut config = tool(&program);
    config.single_flight = single_flight;
    let gateway = ExecutionGateway::new(config, temp.path(), 4096, EventBus::new());

    let (first, second) = tokio::join!(
        gateway.execute_prompt("first"),
        gateway.execute_prompt("second")
    );
    assert_eq!(first.expect("first").trim(), "done");
    assert_eq!(second.expect("second").trim(), "done");

    fs::read_to_string(&events_log)
        .expect("events log")
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn single_flight_serializes_invocations() {
    let events = run_two_concurrently(true).await;
    assert_eq!(events, ["start", "end", "start", "end"]);
}

#[tokio::test]
async fn invocations_overlap_by_default() {
    let events = run_two_concurrently(false).await;
    assert_eq!(events, ["start", "start", "end", "end"]);
}
