use anyhow::Result;
use maestro::MaestroConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("maestro=debug")
        .init();

    let cfg = MaestroConfig::from_env();
    let handle = maestro::spawn(cfg).await?;
    handle.wait().await
}
