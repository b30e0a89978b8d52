//! Server-Sent Events stream and workspace file watcher.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use warden::core::boundary::to_slash;
use warden::io::events::{EventBus, GatewayEvent};

use crate::state::AppState;

/// SSE endpoint handler. Every gateway event is forwarded as one `gateway` message.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => yield Ok(Event::default().event("gateway").data(json)),
                    Err(err) => warn!(err = %err, "failed to serialize event"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Start the workspace watcher in a background task.
pub fn start_workspace_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_workspace_watcher(state).await {
            warn!(error = %e, "workspace watcher failed");
        }
    });
}

async fn run_workspace_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(100)),
    )?;

    let mut roots = state.host.watch_workspace();
    let mut watched: Option<PathBuf> = None;
    retarget(&mut watcher, &mut watched, roots.borrow_and_update().clone());

    // Flush at a fixed interval so a file written continuously still produces updates.
    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(100));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            changed = roots.changed() => {
                if changed.is_err() {
                    debug!("session host dropped, stopping watcher");
                    return Ok(());
                }
                pending_events.clear();
                retarget(&mut watcher, &mut watched, roots.borrow_and_update().clone());
            }
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                if let Some(root) = &watched {
                    publish_changes(&state.events, root, &pending_events);
                }
                pending_events.clear();
            }
        }
    }
}

fn retarget(watcher: &mut PollWatcher, watched: &mut Option<PathBuf>, root: Option<PathBuf>) {
    if *watched == root {
        return;
    }
    if let Some(old) = watched.take()
        && let Err(err) = watcher.unwatch(&old)
    {
        debug!(path = %old.display(), err = %err, "unwatch failed");
    }
    let Some(root) = root else {
        return;
    };
    match watcher.watch(&root, RecursiveMode::Recursive) {
        Ok(()) => {
            info!(path = %root.display(), "watching workspace");
            *watched = Some(root);
        }
        Err(err) => warn!(path = %root.display(), err = %err, "failed to watch workspace"),
    }
}

fn publish_changes(events: &EventBus, root: &Path, batch: &[NotifyEvent]) {
    let paths = changed_paths(root, batch);
    if paths.is_empty() {
        return;
    }
    debug!(count = paths.len(), "broadcasting workspace change");
    events.emit(GatewayEvent::WorkspaceChanged { paths });
}

/// Workspace-relative, `/`-separated paths touched by `batch`, deduplicated and sorted.
fn changed_paths(root: &Path, batch: &[NotifyEvent]) -> Vec<String> {
    let mut paths = BTreeSet::new();
    for event in batch {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            continue;
        }
        for path in &event.paths {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }
            paths.insert(to_slash(relative));
        }
    }
    paths.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use warden::io::config::WardenConfig;

    use super::*;

    fn event(kind: EventKind, path: PathBuf) -> NotifyEvent {
        NotifyEvent {
            kind,
            paths: vec![path],
            attrs: Default::default(),
        }
    }

    fn modify(path: PathBuf) -> NotifyEvent {
        event(EventKind::Modify(notify::event::ModifyKind::Any), path)
    }

    #[test]
    fn changes_are_relative_sorted_and_deduplicated() {
        let root = PathBuf::from("/work/space");
        let batch = [
            modify(root.join("src").join("b.rs")),
            modify(root.join("a.txt")),
            modify(root.join("src").join("b.rs")),
            event(
                EventKind::Remove(notify::event::RemoveKind::File),
                root.join("gone.txt"),
            ),
        ];
        assert_eq!(
            changed_paths(&root, &batch),
            ["a.txt", "gone.txt", "src/b.rs"]
        );
    }

    #[test]
    fn access_events_and_foreign_paths_are_ignored() {
        let root = PathBuf::from("/work/space");
        let batch = [
            event(
                EventKind::Access(notify::event::AccessKind::Any),
                root.join("read.txt"),
            ),
            modify(PathBuf::from("/elsewhere/file.txt")),
            modify(root.clone()),
        ];
        assert!(changed_paths(&root, &batch).is_empty());
    }

    #[tokio::test]
    async fn watcher_reports_new_file_in_selected_workspace() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = AppState::new(WardenConfig::default());
        let mut rx = state.events.subscribe();
        start_workspace_watcher(state.clone());
        state
            .host
            .select_workspace(Some(temp.path()))
            .await
            .expect("select");

        // Give the poller a baseline scan before writing.
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(temp.path().join("created.txt"), "x").expect("write");

        let paths = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(GatewayEvent::WorkspaceChanged { paths }) => return paths,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
                }
            }
        })
        .await
        .expect("workspace change");
        assert!(paths.iter().any(|path| path == "created.txt"), "{paths:?}");
    }
}
