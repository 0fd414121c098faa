//! traffic-engine - attribution replay CLI
//!
//! Replays one page load (and optionally one sign-in) against the configured
//! storage, analytics sinks and attribution backend. Each invocation is one
//! browser tab session: the long-lived scope persists under the root folder,
//! the session scope ends with the process.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;
use traffic_common::config::{resolve_root_folder, TomlConfig};
use traffic_common::{AuthUser, EngineEvent, EventBus};
use traffic_engine::Engine;

#[derive(Parser, Debug)]
#[command(name = "traffic-engine", version, about = "Replay attribution capture and identity linking")]
struct Args {
    /// Config file (default: TRAFFIC_CONFIG or <config_dir>/traffic-engine/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Folder holding long-lived storage
    #[arg(long)]
    root_folder: Option<String>,

    /// Landing page URL, including query string
    #[arg(long)]
    url: String,

    /// Document referrer
    #[arg(long, default_value = "")]
    referrer: String,

    /// Authenticated user record as JSON, e.g. '{"id":"u1","email":"a@b.c"}'
    #[arg(long)]
    user: Option<String>,

    /// Persist the selected locale
    #[arg(long)]
    locale: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::load_or_default(args.config.as_deref());

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let log_file = config.logging.open_file()?;
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match log_file {
        Some(file) => subscriber.with_writer(Mutex::new(file)).with_ansi(false).init(),
        None => subscriber.init(),
    }

    info!("Starting traffic-engine v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    info!("Root folder: {}", root_folder.display());

    let user = args
        .user
        .as_deref()
        .map(serde_json::from_str::<AuthUser>)
        .transpose()
        .map_err(|e| anyhow::anyhow!("Invalid --user JSON: {}", e))?;

    let engine = Arc::new(Engine::from_config(&config, &root_folder));
    if let Some(locale) = &args.locale {
        if let Err(e) = engine.state().set_locale(locale) {
            tracing::warn!(error = %e, "Locale not saved");
        }
    }

    let event_bus = EventBus::new(16);
    let worker = {
        let engine = engine.clone();
        let rx = event_bus.subscribe();
        tokio::spawn(async move { engine.run(rx).await })
    };

    event_bus.emit_lossy(EngineEvent::PageLoaded {
        url: args.url,
        referrer: args.referrer,
    });
    event_bus.emit_lossy(EngineEvent::AuthResolved { user });
    drop(event_bus);

    worker.await?;

    match engine.state().read() {
        Ok(Some(record)) => println!("{}", serde_json::to_string_pretty(&record)?),
        Ok(None) => println!("No pending attribution record"),
        Err(e) => println!("Attribution record unreadable: {}", e),
    }
    Ok(())
}
