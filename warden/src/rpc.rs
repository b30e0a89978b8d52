//! Request/response surface consumed by the UI and CLI.
//!
//! Requests are tagged by `op` (`file.read`, `process.start`, ...). Every
//! response carries `success`; successful ones flatten their payload next to
//! it, failed ones carry `error` and a stable `code`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::core::boundary::to_slash;
use crate::core::types::{TextEncoding, WriteMode};
use crate::error::{Result, SandboxError};
use crate::session::{ProcessStatus, SendOutcome, SessionHost};

fn current_dir() -> String {
    ".".to_string()
}

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op")]
pub enum RpcRequest {
    #[serde(rename = "selectWorkspace")]
    SelectWorkspace {
        /// `None` models a cancelled selection.
        #[serde(default)]
        path: Option<PathBuf>,
    },
    #[serde(rename = "process.start")]
    ProcessStart {
        #[serde(default)]
        workspace: Option<String>,
    },
    #[serde(rename = "process.stop")]
    ProcessStop {
        #[serde(default)]
        force: bool,
    },
    #[serde(rename = "process.send")]
    ProcessSend { message: String },
    #[serde(rename = "process.status")]
    ProcessStatus,
    #[serde(rename = "file.list")]
    FileList {
        #[serde(default = "current_dir")]
        dir: String,
    },
    #[serde(rename = "file.read")]
    FileRead {
        path: String,
        #[serde(default)]
        encoding: TextEncoding,
    },
    #[serde(rename = "file.info")]
    FileInfo { path: String },
    #[serde(rename = "file.exists")]
    FileExists { path: String },
    #[serde(rename = "file.search")]
    FileSearch {
        pattern: String,
        #[serde(default = "current_dir")]
        dir: String,
    },
    #[serde(rename = "file.previewWrite")]
    FilePreviewWrite { path: String, content: String },
    #[serde(rename = "file.write")]
    FileWrite {
        path: String,
        content: String,
        #[serde(default)]
        mode: WriteMode,
    },
    #[serde(rename = "file.mkdir")]
    FileMkdir {
        path: String,
        #[serde(default = "yes")]
        recursive: bool,
    },
    #[serde(rename = "file.move")]
    FileMove { src: String, dst: String },
    #[serde(rename = "file.copy")]
    FileCopy { src: String, dst: String },
    #[serde(rename = "file.delete")]
    FileDelete {
        path: String,
        #[serde(default)]
        recursive: bool,
    },
}

impl RpcRequest {
    pub fn op(&self) -> &'static str {
        match self {
            RpcRequest::SelectWorkspace { .. } => "selectWorkspace",
            RpcRequest::ProcessStart { .. } => "process.start",
            RpcRequest::ProcessStop { .. } => "process.stop",
            RpcRequest::ProcessSend { .. } => "process.send",
            RpcRequest::ProcessStatus => "process.status",
            RpcRequest::FileList { .. } => "file.list",
            RpcRequest::FileRead { .. } => "file.read",
            RpcRequest::FileInfo { .. } => "file.info",
            RpcRequest::FileExists { .. } => "file.exists",
            RpcRequest::FileSearch { .. } => "file.search",
            RpcRequest::FilePreviewWrite { .. } => "file.previewWrite",
            RpcRequest::FileWrite { .. } => "file.write",
            RpcRequest::FileMkdir { .. } => "file.mkdir",
            RpcRequest::FileMove { .. } => "file.move",
            RpcRequest::FileCopy { .. } => "file.copy",
            RpcRequest::FileDelete { .. } => "file.delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl RpcResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            payload: Map::new(),
            error: None,
            code: None,
        }
    }

    pub fn failure(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: Map::new(),
            error: Some(error.into()),
            code: Some(code.into()),
        }
    }

    /// Add one payload field.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.payload.insert(key.to_string(), value);
                self
            }
            Err(err) => RpcResponse::failure(err.to_string(), "SERIALIZATION"),
        }
    }

    /// Merge the fields of a serialized struct into the payload.
    pub fn merge(mut self, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::Object(fields)) => {
                self.payload.extend(fields);
                self
            }
            Ok(other) => self.with("value", other),
            Err(err) => RpcResponse::failure(err.to_string(), "SERIALIZATION"),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

impl From<SandboxError> for RpcResponse {
    fn from(err: SandboxError) -> Self {
        RpcResponse::failure(err.to_string(), err.code())
    }
}

/// Execute one request against the host's selected session.
pub async fn dispatch(host: &SessionHost, request: RpcRequest) -> RpcResponse {
    let op = request.op();
    debug!(op, "rpc request");
    match handle(host, request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(op, code = err.code(), err = %err, "rpc request failed");
            RpcResponse::from(err)
        }
    }
}

async fn handle(host: &SessionHost, request: RpcRequest) -> Result<RpcResponse> {
    match request {
        RpcRequest::SelectWorkspace { path } => {
            let root = host.select_workspace(path.as_deref()).await?;
            Ok(RpcResponse::ok().with("path", root.as_deref().map(to_slash)))
        }
        RpcRequest::ProcessStatus => {
            let status = match host.current().await {
                Ok(session) => session.status().await,
                Err(_) => ProcessStatus::idle(None),
            };
            Ok(RpcResponse::ok().merge(status))
        }
        RpcRequest::ProcessStart { workspace } => {
            let session = host.current().await?;
            session.start_process(workspace.as_deref()).await?;
            Ok(RpcResponse::ok())
        }
        RpcRequest::ProcessStop { force } => {
            let session = host.current().await?;
            session.stop_process(force).await?;
            Ok(RpcResponse::ok())
        }
        RpcRequest::ProcessSend { message } => {
            let session = host.current().await?;
            match session.send(&message).await? {
                SendOutcome::Delivered => Ok(RpcResponse::ok()),
                SendOutcome::Output(output) => Ok(RpcResponse::ok().with("output", output)),
            }
        }
        RpcRequest::FileList { dir } => {
            let session = host.current().await?;
            let files = session.files().list(&dir)?;
            Ok(RpcResponse::ok().with("files", files))
        }
        RpcRequest::FileRead { path, encoding } => {
            let session = host.current().await?;
            let content = session.files().read_text(&path, encoding)?;
            Ok(RpcResponse::ok().with("content", content))
        }
        RpcRequest::FileInfo { path } => {
            let session = host.current().await?;
            let info = session.files().get_info(&path)?;
            Ok(RpcResponse::ok().with("info", info))
        }
        RpcRequest::FileExists { path } => {
            let session = host.current().await?;
            Ok(RpcResponse::ok().with("exists", session.files().exists(&path)))
        }
        RpcRequest::FileSearch { pattern, dir } => {
            let session = host.current().await?;
            let results = session.files().search_by_name(&pattern, &dir)?;
            Ok(RpcResponse::ok().with("results", results))
        }
        RpcRequest::FilePreviewWrite { path, content } => {
            let session = host.current().await?;
            let preview = session.files().preview_write(&path, &content)?;
            Ok(RpcResponse::ok().merge(preview))
        }
        RpcRequest::FileWrite {
            path,
            content,
            mode,
        } => {
            let session = host.current().await?;
            let written = session.files().write_text(&path, &content, mode)?;
            Ok(RpcResponse::ok().with("path", to_slash(&written)))
        }
        RpcRequest::FileMkdir { path, recursive } => {
            let session = host.current().await?;
            let created = session.files().mkdir(&path, recursive)?;
            Ok(RpcResponse::ok().with("path", to_slash(&created)))
        }
        RpcRequest::FileMove { src, dst } => {
            let session = host.current().await?;
            let (from, to) = session.files().move_path(&src, &dst)?;
            Ok(RpcResponse::ok()
                .with("src", to_slash(&from))
                .with("dst", to_slash(&to)))
        }
        RpcRequest::FileCopy { src, dst } => {
            let session = host.current().await?;
            let (from, to) = session.files().copy(&src, &dst)?;
            Ok(RpcResponse::ok()
                .with("src", to_slash(&from))
                .with("dst", to_slash(&to)))
        }
        RpcRequest::FileDelete { path, recursive } => {
            let session = host.current().await?;
            let deleted = session.files().delete(&path, recursive)?;
            Ok(RpcResponse::ok().with("path", to_slash(&deleted)))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::io::config::WardenConfig;
    use crate::io::events::EventBus;
    use crate::test_support::workspace_fixture;

    fn parse(value: Value) -> RpcRequest {
        serde_json::from_value(value).expect("parse request")
    }

    async fn selected_host() -> (tempfile::TempDir, SessionHost) {
        let temp = workspace_fixture();
        let host = SessionHost::new(WardenConfig::default(), EventBus::new());
        let response = dispatch(
            &host,
            RpcRequest::SelectWorkspace {
                path: Some(temp.path().to_path_buf()),
            },
        )
        .await;
        assert!(response.success, "{response:?}");
        (temp, host)
    }

    #[test]
    fn requests_parse_with_defaults() {
        assert_eq!(
            parse(json!({"op": "file.list"})),
            RpcRequest::FileList {
                dir: ".".to_string()
            }
        );
        assert_eq!(
            parse(json!({"op": "file.read", "path": "a.txt"})),
            RpcRequest::FileRead {
                path: "a.txt".to_string(),
                encoding: TextEncoding::Utf8
            }
        );
        assert_eq!(parse(json!({"op": "process.status"})), RpcRequest::ProcessStatus);
        assert_eq!(
            parse(json!({"op": "selectWorkspace"})),
            RpcRequest::SelectWorkspace { path: None }
        );
    }

    #[test]
    fn failure_serializes_error_and_code() {
        let response = RpcResponse::from(SandboxError::WorkspaceNotSelected);
        let json = serde_json::to_value(&response).expect("json");
        assert_eq!(
            json,
            json!({
                "success": false,
                "error": "Workspace not selected",
                "code": "WORKSPACE_NOT_SELECTED"
            })
        );
    }

    #[test]
    fn payload_is_flattened() {
        let response = RpcResponse::ok().with("content", "hello");
        let json = serde_json::to_value(&response).expect("json");
        assert_eq!(json, json!({"success": true, "content": "hello"}));
    }

    #[tokio::test]
    async fn file_ops_fail_without_workspace() {
        let host = SessionHost::new(WardenConfig::default(), EventBus::new());
        let response = dispatch(&host, parse(json!({"op": "file.list"}))).await;
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Workspace not selected"));

        let response = dispatch(&host, RpcRequest::ProcessStatus).await;
        assert!(response.success);
        assert_eq!(response.get("running"), Some(&json!(false)));
        assert_eq!(response.get("state"), Some(&json!("stopped")));
    }

    #[tokio::test]
    async fn cancelled_selection_returns_null() {
        let host = SessionHost::new(WardenConfig::default(), EventBus::new());
        let response = dispatch(&host, RpcRequest::SelectWorkspace { path: None }).await;
        assert!(response.success);
        assert_eq!(response.get("path"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn read_write_and_preview_through_rpc() {
        let (_temp, host) = selected_host().await;

        let response = dispatch(
            &host,
            parse(json!({
                "op": "file.previewWrite",
                "path": "file1.txt",
                "content": "content1\nmore"
            })),
        )
        .await;
        assert!(response.success);
        assert_eq!(response.get("isNewFile"), Some(&json!(false)));
        assert!(response.get("diff").is_some());

        let response = dispatch(
            &host,
            parse(json!({"op": "file.write", "path": "notes.txt", "content": "hi"})),
        )
        .await;
        assert!(response.success, "{response:?}");

        let request = parse(json!({"op": "file.read", "path": "notes.txt"}));
        let response = dispatch(&host, request).await;
        assert_eq!(response.get("content"), Some(&json!("hi")));

        let request = parse(json!({"op": "file.search", "pattern": "nested"}));
        let response = dispatch(&host, request).await;
        let results = response.get("results").and_then(Value::as_array).expect("results");
        assert_eq!(results[0]["name"], "nested.txt");
        assert_eq!(results[0]["isDirectory"], false);
    }

    #[tokio::test]
    async fn escaping_paths_fail_with_code() {
        let (_temp, host) = selected_host().await;
        let response = dispatch(
            &host,
            parse(json!({"op": "file.read", "path": "../../../etc/passwd"})),
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.code.as_deref(), Some("PATH_OUTSIDE_WORKSPACE"));
    }

    #[tokio::test]
    async fn send_without_process_reports_not_running() {
        let (_temp, host) = selected_host().await;
        let response = dispatch(
            &host,
            parse(json!({"op": "process.send", "message": "hello"})),
        )
        .await;
        assert!(!response.success);
        assert_eq!(response.code.as_deref(), Some("NOT_RUNNING"));
    }
}
