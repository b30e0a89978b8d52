//! Sandbox configuration stored in `warden.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::capacity::{CapacityClassifier, DEFAULT_CAPACITY_SIGNATURES};
use crate::core::restart::RestartPolicy;

/// Default file name looked up in the workspace root.
pub const CONFIG_FILE_NAME: &str = "warden.toml";

/// Top-level configuration (TOML).
///
/// Intended to be edited by humans. Missing fields default to values that
/// drive the `gemini` CLI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WardenConfig {
    /// Upper bound on buffered process output, per buffer.
    pub output_limit_bytes: usize,

    /// What `process.send` does with a message.
    pub send_mode: SendMode,

    pub tool: ToolConfig,

    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// Write the message to the long-lived supervised process.
    #[default]
    Interactive,
    /// Run the message as a one-shot prompt and return its output.
    OneShot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolConfig {
    /// Executable name or path of the external tool.
    pub program: String,

    /// Arguments for the long-lived interactive process.
    pub interactive_args: Vec<String>,

    /// Model used for one-shot invocations.
    pub model: String,

    /// Model substituted once when the primary reports capacity exhaustion.
    pub fallback_model: Option<String>,

    /// Value for `--output-format`.
    pub output_format: String,

    /// Deadline for one one-shot invocation, in seconds.
    pub timeout_secs: u64,

    /// Case-insensitive phrases identifying capacity exhaustion.
    pub capacity_signatures: Vec<String>,

    /// Serialize concurrent one-shot invocations.
    pub single_flight: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "gemini".to_string(),
            interactive_args: Vec::new(),
            model: "gemini-2.5-pro".to_string(),
            fallback_model: Some("gemini-2.5-flash".to_string()),
            output_format: "text".to_string(),
            timeout_secs: 180,
            capacity_signatures: DEFAULT_CAPACITY_SIGNATURES
                .iter()
                .map(|signature| signature.to_string())
                .collect(),
            single_flight: false,
        }
    }
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The fallback model, unless it is unset, blank, or equal to the primary.
    pub fn effective_fallback(&self) -> Option<&str> {
        self.fallback_model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty() && *model != self.model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    pub auto_restart: bool,
    pub restart_delay_ms: u64,
    pub max_restarts: u32,
    /// Grace window between the termination signal and the forced kill.
    pub stop_grace_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_restart: false,
            restart_delay_ms: 1000,
            max_restarts: 3,
            stop_grace_secs: 5,
        }
    }
}

impl SupervisorConfig {
    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            enabled: self.auto_restart,
            max_restarts: self.max_restarts,
            delay: Duration::from_millis(self.restart_delay_ms),
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            output_limit_bytes: 1024 * 1024,
            send_mode: SendMode::default(),
            tool: ToolConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl WardenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.tool.program.trim().is_empty() {
            return Err(anyhow!("tool.program must be non-empty"));
        }
        if self.tool.model.trim().is_empty() {
            return Err(anyhow!("tool.model must be non-empty"));
        }
        if self.tool.output_format.trim().is_empty() {
            return Err(anyhow!("tool.output_format must be non-empty"));
        }
        if self.tool.timeout_secs == 0 {
            return Err(anyhow!("tool.timeout_secs must be > 0"));
        }
        if self.supervisor.stop_grace_secs == 0 {
            return Err(anyhow!("supervisor.stop_grace_secs must be > 0"));
        }
        if self
            .tool
            .capacity_signatures
            .iter()
            .any(|signature| signature.trim().is_empty())
        {
            return Err(anyhow!("tool.capacity_signatures must not contain blank entries"));
        }
        CapacityClassifier::new(&self.tool.capacity_signatures)
            .context("tool.capacity_signatures")?;
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `WardenConfig::default()`.
pub fn load_config(path: &Path) -> Result<WardenConfig> {
    if !path.exists() {
        let cfg = WardenConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: WardenConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &WardenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
