//! Storage trait for persisted engine documents.

use async_trait::async_trait;

use crate::error::Result;
use crate::persistence::{BanDocument, BondDocument, DocumentSnapshot, TierDocument};

/// Backend holding the three engine documents.
///
/// Each `store` replaces one whole document. Loading a document that was
/// never stored yields an empty one.
#[async_trait]
pub trait StateStorage: Send + Sync {
    /// Load active bans.
    async fn load_bans(&self) -> Result<BanDocument>;

    /// Load ban tiers.
    async fn load_tiers(&self) -> Result<TierDocument>;

    /// Load bond edges.
    async fn load_bonds(&self) -> Result<BondDocument>;

    /// Replace the document the snapshot belongs to.
    async fn store(&self, snapshot: &DocumentSnapshot) -> Result<()>;
}
