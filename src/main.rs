use clap::Parser;
use lottery::{config::ServerConfig, server::Server, shutdown};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    lottery::config::init_tracing(&config.log_level);
    tracing::debug!("starting with {:?}", config);

    let server = Server::from_config(&config).await?;

    let stop = server.shutdown_handle();
    tokio::spawn(async move {
        shutdown::signal().await;
        stop.trigger();
    });

    server.run().await
}
