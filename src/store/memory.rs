use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Bet, BetStore, StoreError};

/// Keeps every bet in memory, bets are lost once the process exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    bets: Mutex<Vec<Bet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BetStore for MemoryStore {
    async fn append(&self, bets: &[Bet]) -> Result<(), StoreError> {
        self.bets.lock().await.extend_from_slice(bets);
        Ok(())
    }

    async fn all(&self) -> Result<Vec<Bet>, StoreError> {
        Ok(self.bets.lock().await.clone())
    }
}
