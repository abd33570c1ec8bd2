use browser_key_exchange::{Config, run};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();

    // Initialize tracing, RUST_LOG wins over --log-level
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        listen_addr = %config.listen_addr,
        key_dir = %config.key_dir.display(),
        in_memory = config.in_memory,
        "starting browser key exchange service"
    );

    run(config).await?;

    Ok(())
}
