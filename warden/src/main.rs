//! Command-line front end for the sandboxed gateway.
//!
//! Every command opens a session on `--workspace`, runs one operation, and
//! prints the JSON response on stdout. The exit code reflects the failure class.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use warden::core::boundary::to_slash;
use warden::core::types::{TextEncoding, WriteMode};
use warden::exit_codes;
use warden::io::config::{CONFIG_FILE_NAME, load_config};
use warden::io::events::EventBus;
use warden::logging;
use warden::rpc::{RpcRequest, RpcResponse, dispatch};
use warden::session::SessionHost;

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Sandboxed file and process gateway for an AI command-line tool"
)]
struct Cli {
    /// Workspace root; no path may escape it.
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Config file (default: `<workspace>/warden.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate paths against the workspace and print their canonical form.
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List a directory.
    Ls {
        #[arg(default_value = ".")]
        dir: String,
    },
    /// Print a file's text content.
    Cat {
        path: String,
        #[arg(long, default_value = "utf-8")]
        encoding: TextEncoding,
    },
    /// Show size, type, and timestamps.
    Info { path: String },
    /// Find entries whose name contains `pattern`.
    Search {
        pattern: String,
        #[arg(default_value = ".")]
        dir: String,
    },
    /// Show the line diff a write would produce, without writing.
    PreviewWrite {
        path: String,
        /// New content (default: read from stdin).
        #[arg(long)]
        content: Option<String>,
    },
    /// Write text to a file.
    Write {
        path: String,
        /// Content to write (default: read from stdin).
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        append: bool,
    },
    /// Run one prompt through the tool, with deadline and capacity fallback.
    Exec { prompt: String },
}

#[tokio::main]
async fn main() {
    logging::init();
    let code = match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.workspace.join(CONFIG_FILE_NAME));
    let config = load_config(&config_path)?;

    let host = SessionHost::new(config, EventBus::new());
    let selected = dispatch(
        &host,
        RpcRequest::SelectWorkspace {
            path: Some(cli.workspace.clone()),
        },
    )
    .await;
    if !selected.success {
        return print_response(&selected);
    }

    let response = match cli.command {
        Command::Check { paths } => {
            let session = host.current().await?;
            match session.files().validator().validate_batch(&paths) {
                Ok(valid) => {
                    let paths: Vec<String> = valid.iter().map(|path| to_slash(path)).collect();
                    RpcResponse::ok().with("paths", paths)
                }
                Err(err) => RpcResponse::from(err),
            }
        }
        Command::Ls { dir } => dispatch(&host, RpcRequest::FileList { dir }).await,
        Command::Cat { path, encoding } => {
            dispatch(&host, RpcRequest::FileRead { path, encoding }).await
        }
        Command::Info { path } => dispatch(&host, RpcRequest::FileInfo { path }).await,
        Command::Search { pattern, dir } => {
            dispatch(&host, RpcRequest::FileSearch { pattern, dir }).await
        }
        Command::PreviewWrite { path, content } => {
            let content = content_or_stdin(content)?;
            dispatch(&host, RpcRequest::FilePreviewWrite { path, content }).await
        }
        Command::Write {
            path,
            content,
            append,
        } => {
            let content = content_or_stdin(content)?;
            let mode = if append {
                WriteMode::Append
            } else {
                WriteMode::Overwrite
            };
            dispatch(&host, RpcRequest::FileWrite { path, content, mode }).await
        }
        Command::Exec { prompt } => {
            let session = host.current().await?;
            match session.execution().execute_prompt(&prompt).await {
                Ok(output) => RpcResponse::ok().with("output", output),
                Err(err) => RpcResponse::from(err),
            }
        }
    };
    host.close().await;
    print_response(&response)
}

fn content_or_stdin(content: Option<String>) -> Result<String> {
    match content {
        Some(content) => Ok(content),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read content from stdin")?;
            Ok(buf)
        }
    }
}

fn print_response(response: &RpcResponse) -> Result<i32> {
    let json = serde_json::to_string_pretty(response).context("serialize response")?;
    println!("{json}");
    if response.success {
        return Ok(exit_codes::OK);
    }
    Ok(exit_codes::for_code(
        response.code.as_deref().unwrap_or_default(),
    ))
}
