//! In-memory state storage for development and testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::traits::StateStorage;
use crate::error::{EngineError, Result};
use crate::persistence::{BanDocument, BondDocument, DocumentSnapshot, TierDocument};

/// In-memory storage implementation.
#[derive(Default)]
pub struct InMemoryStateStorage {
    bans: RwLock<BanDocument>,
    tiers: RwLock<TierDocument>,
    bonds: RwLock<BondDocument>,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryStateStorage {
    /// Create a new, empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `store` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent `store` fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStorage for InMemoryStateStorage {
    async fn load_bans(&self) -> Result<BanDocument> {
        Ok(self.bans.read().clone())
    }

    async fn load_tiers(&self) -> Result<TierDocument> {
        Ok(self.tiers.read().clone())
    }

    async fn load_bonds(&self) -> Result<BondDocument> {
        Ok(self.bonds.read().clone())
    }

    async fn store(&self, snapshot: &DocumentSnapshot) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EngineError::Storage("storage unavailable".to_string()));
        }

        match snapshot {
            DocumentSnapshot::Bans(doc) => *self.bans.write() = doc.clone(),
            DocumentSnapshot::Tiers(doc) => *self.tiers.write() = doc.clone(),
            DocumentSnapshot::Bonds(doc) => *self.bonds.write() = doc.clone(),
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
