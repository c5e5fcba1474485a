use anyhow::Result;
use storefront_edge::config::Settings;
use storefront_edge::Application;
use tracing::{info, instrument};
use tracing_subscriber::EnvFilter;

#[tokio::main]
#[instrument]
async fn main() -> Result<()> {
    let settings = Settings::new()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting storefront edge application");

    let app = Application::new(settings).await?;
    app.run().await?;

    Ok(())
}
