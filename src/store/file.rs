use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::Mutex,
};

use super::{Bet, BetStore, StoreError};

/// An append-only store that keeps one JSON encoded bet per line
///
/// the file is never truncated, bets from previous runs are part of the draw.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    // guards both the appends and the full re-reads
    file: Mutex<File>,
}

impl FileStore {
    /// Opens the store at `path`, creating the file if it does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_owned();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl BetStore for FileStore {
    async fn append(&self, bets: &[Bet]) -> Result<(), StoreError> {
        // encode the whole batch up-front so a bad record can't leave half a batch behind
        let mut raw = Vec::new();
        for bet in bets {
            serde_json::to_writer(&mut raw, bet)?;
            raw.push(b'\n');
        }

        let mut file = self.file.lock().await;
        file.write_all(&raw).await?;
        file.flush().await?;

        Ok(())
    }

    async fn all(&self) -> Result<Vec<Bet>, StoreError> {
        // hold the writer lock for the entire scan
        let _file = self.file.lock().await;

        let mut lines = BufReader::new(File::open(&self.path).await?).lines();
        let mut bets = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            bets.push(serde_json::from_str(&line)?);
        }

        Ok(bets)
    }
}
