use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = switchboard_core::config::SwitchboardConfig::load()
        .context("failed to load configuration")?;
    info!(db = %config.database.path, "switchboard starting");

    let app = app::App::build(config).await?;
    app.run_until_shutdown().await;

    info!("switchboard stopped");
    Ok(())
}
