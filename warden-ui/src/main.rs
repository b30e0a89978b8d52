//! Warden UI server - HTTP and SSE front end for the sandboxed gateway.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use axum::routing::get;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};
use warden::io::config::{CONFIG_FILE_NAME, load_config};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "warden-ui")]
#[command(about = "Web UI and RPC endpoint for the sandboxed gateway")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Workspace to select at startup
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Config file (defaults to warden.toml in the startup workspace or current directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory containing UI static files (defaults to ./ui/dist)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("warden_ui=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(|| {
        args.workspace
            .as_deref()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join(CONFIG_FILE_NAME)
    });
    let config = load_config(&config_path)?;
    info!(config = %config_path.display(), "starting warden-ui");

    let state = AppState::new(config);
    sse::start_workspace_watcher(state.clone());

    if let Some(workspace) = &args.workspace {
        let root = state.host.select_workspace(Some(workspace)).await?;
        if let Some(root) = root {
            info!(workspace = %root.display(), "workspace selected");
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new()
        .nest("/api", routes::api_router())
        .route("/events", get(sse::events_handler))
        .layer(cors)
        .with_state(state.clone());

    let ui_dir = args.ui_dir.unwrap_or_else(|| PathBuf::from("ui").join("dist"));
    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Supervised processes must not outlive the server.
    state.host.close().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(err = %err, "failed to listen for ctrl-c");
    }
}
