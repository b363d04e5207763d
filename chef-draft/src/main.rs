// Chef draft hub entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file)
// 2. Load config
// 3. Open the hub database and restore stored rows
// 4. Bind the WebSocket listener
// 5. Serve clients until Ctrl+C

use std::sync::Arc;

use chef_draft::config;
use chef_draft::db;
use chef_draft::hub;

use anyhow::Context;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Chef draft hub starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!("Config loaded: hub on {}", config.hub.addr());

    // 3. Open the hub database
    let db = db::Database::open(&config.database.hub_path).context("failed to open hub database")?;
    info!("Hub database opened at {}", config.database.hub_path);
    let hub = Arc::new(hub::Hub::with_database(db).context("failed to restore hub rows")?);

    // 4. Bind the listener
    let listener = hub::bind(&config.hub.addr()).await?;

    // 5. Serve until Ctrl+C
    tokio::select! {
        result = hub::run(listener, hub) => {
            if let Err(e) = &result {
                error!("Hub server error: {e:#}");
            }
            result?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("Ctrl+C received, shutting down");
        }
    }

    info!("Chef draft hub shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to `logs/chef-draft-hub.log`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("chef-draft-hub.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chef_draft=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
