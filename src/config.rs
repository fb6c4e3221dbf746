use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::store::{AgencyId, BetStore, FileStore, LotteryNumber, MemoryStore};

/// How a consult that arrives before the draw is answered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ConsultMode {
    /// Keep the connection waiting until the draw takes place
    #[default]
    Block,
    /// Reply WAIT right away, the agency is expected to consult again
    Poll,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "lottery-server", about = "Collects bets from agencies and runs the draw")]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:12345")]
    pub listen: SocketAddr,

    /// Number of agencies taking part, numbered from 1
    #[arg(long, env = "EXPECTED_AGENCIES", default_value_t = 5)]
    pub agencies: AgencyId,

    /// The number that wins the draw
    #[arg(long, env = "WINNING_NUMBER", default_value_t = 7574)]
    pub winning_number: LotteryNumber,

    /// Keep the bets in this file, in memory if not set
    #[arg(long, env = "BETS_FILE")]
    pub bets_file: Option<PathBuf>,

    /// How consults are answered before the draw
    #[arg(long, env = "CONSULT_MODE", value_enum, default_value_t = ConsultMode::Block)]
    pub consult: ConsultMode,

    /// Log filter, e.g. `info` or `lottery=debug`
    #[arg(long, env = "LOGGING_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    pub fn expected_agencies(&self) -> impl Iterator<Item = AgencyId> {
        1..=self.agencies
    }

    /// Opens the configured bet store
    pub async fn open_store(&self) -> anyhow::Result<Arc<dyn BetStore>> {
        let store: Arc<dyn BetStore> = match &self.bets_file {
            Some(path) => {
                let store = FileStore::open(path)
                    .await
                    .with_context(|| format!("failed to open the bets file {}", path.display()))?;
                tracing::info!(path = %store.path().display(), "keeping the bets in a file");
                Arc::new(store)
            }
            None => {
                tracing::info!("keeping the bets in memory");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(store)
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "agency", about = "Sends an agency's bets and consults its winners")]
pub struct AgencyConfig {
    /// Address of the lottery server
    #[arg(long, env = "SERVER_ADDRESS", default_value = "127.0.0.1:12345")]
    pub server: SocketAddr,

    /// Id of this agency
    #[arg(long, env = "CLI_ID")]
    pub id: AgencyId,

    /// CSV file with one `first_name,last_name,document,birthdate,number` bet per line
    #[arg(long, env = "BETS_FILE")]
    pub bets: PathBuf,

    /// Maximum number of bets per batch
    #[arg(long, env = "BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Delay between consults while the server asks to wait
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Log filter, e.g. `info` or `lottery=debug`
    #[arg(long, env = "LOGGING_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl AgencyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Connects tracing to stdout, filtered by `level`
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|err| {
        eprintln!("invalid log level {:?} ({}), using info", level, err);
        EnvFilter::new("info")
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
