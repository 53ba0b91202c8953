//! dashforge server entry point.

use dashforge::{api, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the subscriber so RUST_LOG can live there too.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dashforge=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!("Starting dashforge on {}:{}", config.host, config.port);
    for (provider, spec) in config.models.iter() {
        tracing::debug!("Provider {} -> {}", provider, spec.model_id);
    }

    api::serve(config).await
}
