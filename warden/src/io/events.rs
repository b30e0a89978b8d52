//! Typed events published by the supervisor and execution gateway.
//!
//! Observers subscribe to an [`EventBus`] and receive immutable [`GatewayEvent`]
//! records. Dropping the receiver unsubscribes.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::types::{ProcessState, StreamKind};

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    State {
        state: ProcessState,
    },
    Started {
        pid: Option<u32>,
    },
    Output {
        stream: StreamKind,
        data: String,
    },
    Sent {
        message: String,
    },
    Exited {
        code: Option<i32>,
        signal: Option<i32>,
    },
    Restarting {
        attempt: u32,
        #[serde(rename = "maxRestarts")]
        max_restarts: u32,
    },
    Stopped,
    Error {
        message: String,
    },
    Notice {
        kind: NoticeKind,
        message: String,
    },
    WorkspaceChanged {
        paths: Vec<String>,
    },
}

/// Informational notices that are distinct from hard failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Fallback,
    Timeout,
}

/// Broadcast fan-out of [`GatewayEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GatewayEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn emit(&self, event: GatewayEvent) {
        if self.tx.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }

}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
