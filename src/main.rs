use faasr_gateway::{AppState, build_router, config::AppConfig, metrics};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config.logging);

    tracing::info!(
        public_url = %config.server.base_url(),
        base_path = %config.server.functions_base_path,
        upstream = %config.github.upstream_full_name(),
        "Starting faasr-gateway"
    );

    metrics::init_metrics();

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let app = build_router(AppState::new(config)?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// `RUST_LOG` wins over `logging.level`
fn init_tracing(logging: &faasr_gateway::config::LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("faasr_gateway={},tower_http=debug", logging.level))
    });
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().pretty()).init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutting down"),
        Err(error) => {
            tracing::error!(%error, "Failed to listen for ctrl-c; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
