//! grcsync server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `GRCSYNC__*` environment variables, opens the SQLite store, and serves the
//! sync API over HTTP.
//!
//! ```sh
//! GRCSYNC__REMOTE__BASE_URL=https://grc.example.com \
//! GRCSYNC__REMOTE__BEARER_TOKEN=... \
//!   cargo run -p grcsync-api --bin grcsync-server -- --config config.toml
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use clap::Parser;
use grcsync_api::ServerConfig;
use grcsync_engine::SyncEngine;
use grcsync_remote::GrcClient;
use grcsync_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "GRC compliance statement sync server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Override the listen port from the configuration.
  #[arg(long)]
  port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("GRCSYNC").separator("__"))
    .build()
    .context("failed to read config file")?;

  let mut server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;
  if let Some(port) = cli.port {
    server_cfg.port = port;
  }

  let store_path = expand_tilde(&server_cfg.store_path);
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let client = GrcClient::new(server_cfg.remote.clone(), server_cfg.schema.clone())
    .context("failed to build the GRC client")?;
  tracing::info!(remote = %server_cfg.remote.base_url, "using GRC system");

  let engine = SyncEngine::new(
    Arc::new(store),
    client,
    server_cfg.engine.clone(),
    server_cfg.audit.clone(),
  );
  engine
    .recover_abandoned_jobs()
    .await
    .context("failed to recover abandoned jobs")?;

  let app = grcsync_api::api_router(engine).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
