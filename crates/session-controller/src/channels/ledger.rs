//! Record of group numbers in use.

use crate::errors::ScError;
use async_trait::async_trait;
use common::GuildId;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

/// Lookup collaborator for sequence-number allocation.
///
/// May be durable or in-memory. The scope actor reads, decides and records
/// without interleaving other events of the same guild.
#[async_trait]
pub trait NumberLedger: Send + Sync {
    async fn list_active_numbers(&self, guild: GuildId) -> Result<BTreeSet<u32>, ScError>;

    async fn record(&self, guild: GuildId, number: u32) -> Result<(), ScError>;

    /// Releasing a number that is not recorded is not an error.
    async fn release(&self, guild: GuildId, number: u32) -> Result<(), ScError>;
}

#[derive(Debug, Default)]
pub struct InMemoryNumberLedger {
    numbers: RwLock<HashMap<GuildId, BTreeSet<u32>>>,
}

impl InMemoryNumberLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NumberLedger for InMemoryNumberLedger {
    async fn list_active_numbers(&self, guild: GuildId) -> Result<BTreeSet<u32>, ScError> {
        Ok(self
            .numbers
            .read()
            .await
            .get(&guild)
            .cloned()
            .unwrap_or_default())
    }

    async fn record(&self, guild: GuildId, number: u32) -> Result<(), ScError> {
        self.numbers
            .write()
            .await
            .entry(guild)
            .or_default()
            .insert(number);
        Ok(())
    }

    async fn release(&self, guild: GuildId, number: u32) -> Result<(), ScError> {
        let mut numbers = self.numbers.write().await;
        if let Some(set) = numbers.get_mut(&guild) {
            set.remove(&number);
            if set.is_empty() {
                numbers.remove(&guild);
            }
        }
        Ok(())
    }
}
