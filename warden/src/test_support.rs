//! Test-only helpers: workspace fixtures, fake tool scripts, and event waits.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::io::events::GatewayEvent;

/// How long [`next_event`] waits before failing the test.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// A temporary workspace with `file1.txt`, `file2.txt`, and `folder1/nested.txt`.
pub fn workspace_fixture() -> tempfile::TempDir {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("file1.txt"), "content1").expect("write file1");
    fs::write(temp.path().join("file2.txt"), "content2").expect("write file2");
    fs::create_dir_all(temp.path().join("folder1")).expect("mkdir folder1");
    fs::write(temp.path().join("folder1/nested.txt"), "nested").expect("write nested");
    temp
}

/// Write an executable `/bin/sh` script standing in for the external tool.
#[cfg(unix)]
pub fn write_fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write fake tool");
    let mut perms = fs::metadata(&path).expect("stat fake tool").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod fake tool");
    path
}

/// Receive the next event, skipping over lag, failing after [`EVENT_TIMEOUT`].
pub async fn next_event(rx: &mut broadcast::Receiver<GatewayEvent>) -> GatewayEvent {
    loop {
        match tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for event")
        {
            Ok(event) => return event,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
        }
    }
}

/// Drain events until one matches `pred`, returning it.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<GatewayEvent>,
    mut pred: F,
) -> GatewayEvent
where
    F: FnMut(&GatewayEvent) -> bool,
{
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}
