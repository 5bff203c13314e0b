//! entity_db server
//!
//! Starts the REST API over the in-memory entity store.
//!
//! Usage:
//!   cargo run --bin entity_db       # start server (PORT, default 8000)
//!   cargo run --bin load_data       # seed demo records into a running server
//!   # Then use entitydb-cli or curl (see SPEC_FULL.md for routes)

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use entity_db::config::Config;
use entity_db::generation::ContentGateway;
use entity_db::rest::{create_router, AppState};

/// Plain or JSON logs to stdout, or to a daily-rotated file when `LOG_DIR`
/// is set. The returned guard must live as long as the process.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("entity_db=info,tower_http=info"));
    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);

    let (writer, guard) = match std::env::var("LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "entity_db.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (tracing_subscriber::fmt::writer::BoxMakeWriter::new(writer), Some(guard))
        }
        Err(_) => (tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout), None),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(writer)).init();
    } else {
        registry.with(fmt::layer().with_writer(writer)).init();
    }
    guard
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
    }
    info!("Shutting down...");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env may carry RUST_LOG / LOG_FORMAT / LOG_DIR, so load it before tracing.
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();
    let config = Config::from_env()?;

    let addr = config.socket_addr()?;
    let gateway = ContentGateway::from_config(&config)?;
    let seed = config.seed_identities;
    let state = AppState::new(config, gateway);

    if seed {
        let directory = state.directory.clone();
        tokio::task::spawn_blocking(move || directory.seed_defaults()).await??;
        info!("seeded default identities (admin, lecturer1, student1)");
    }

    let app = create_router(state);
    let listener = TcpListener::bind(&addr).await?;
    info!("entity_db REST API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
