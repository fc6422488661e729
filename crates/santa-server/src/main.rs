// Secret Santa service entry point.
//
// Startup sequence:
// 1. Load config (seeding config/ from defaults/)
// 2. Initialize tracing
// 3. Open database and build the draw service
// 4. Serve the HTTP API until Ctrl+C

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use santa_core::config;
use santa_server::routes;
use santa_server::service::SantaService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config before tracing so the debug flag can pick the log level.
    let config = config::load_config().context("failed to load configuration")?;

    // 2. Initialize tracing
    init_tracing(config.server.debug)?;
    info!("Secret Santa service starting up");
    info!(
        "Config loaded: database={}, max_attempts={}, latest_draws_limit={}",
        config.db_path, config.draw.max_attempts, config.draw.latest_draws_limit
    );

    // 3. Open database and build the service
    let service = SantaService::from_config(&config).context("failed to build draw service")?;
    info!("Database opened at {}", config.db_path);

    // 4. Serve
    let app = routes::router(Arc::new(service));
    let addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Secret Santa service shut down cleanly");
    Ok(())
}

/// Log to stderr. `RUST_LOG` wins over the config's debug flag.
fn init_tracing(debug: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let default_filter = if debug {
        "santa_server=debug,santa_core=debug,tower_http=debug,warn"
    } else {
        "santa_server=info,santa_core=info,warn"
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
