use clap::Parser;
use lottery::{
    config::{init_tracing, AgencyConfig},
    shutdown,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgencyConfig::parse();
    init_tracing(&config.log_level);

    // a termination signal drops the connection wherever the agency is
    tokio::select! {
        winners = lottery::client::run(&config) => {
            let winners = winners?;
            println!("agency {}: {} winners", config.id, winners.len());
        }
        _ = shutdown::signal() => {
            tracing::info!(agency = config.id, "terminated before receiving the winners");
        }
    }

    Ok(())
}
