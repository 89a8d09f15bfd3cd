//! JSON file storage.
//!
//! One pretty-printed file per document inside a data directory. Writes go
//! to a temporary sibling first and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::traits::StateStorage;
use crate::error::Result;
use crate::persistence::{BanDocument, BondDocument, DocumentKind, DocumentSnapshot, TierDocument};

/// File-backed storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `kind`.
    pub fn path_for(&self, kind: DocumentKind) -> PathBuf {
        let file = match kind {
            DocumentKind::Bans => "bans.json",
            DocumentKind::Tiers => "tiers.json",
            DocumentKind::Bonds => "bonds.json",
        };
        self.dir.join(file)
    }

    async fn read<T: DeserializeOwned + Default>(&self, kind: DocumentKind) -> Result<T> {
        let path = self.path_for(kind);
        match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Ok(T::default()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize>(&self, kind: DocumentKind, document: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(kind);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Wrote document");
        Ok(())
    }
}

#[async_trait]
impl StateStorage for JsonFileStorage {
    async fn load_bans(&self) -> Result<BanDocument> {
        self.read(DocumentKind::Bans).await
    }

    async fn load_tiers(&self) -> Result<TierDocument> {
        self.read(DocumentKind::Tiers).await
    }

    async fn load_bonds(&self) -> Result<BondDocument> {
        self.read(DocumentKind::Bonds).await
    }

    async fn store(&self, snapshot: &DocumentSnapshot) -> Result<()> {
        match snapshot {
            DocumentSnapshot::Bans(doc) => self.write(DocumentKind::Bans, doc).await,
            DocumentSnapshot::Tiers(doc) => self.write(DocumentKind::Tiers, doc).await,
            DocumentSnapshot::Bonds(doc) => self.write(DocumentKind::Bonds, doc).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use chrono::{Duration, Utc};
    use soulbond_types::{BanEntry, PlayerId};

    #[tokio::test]
    async fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("state"));

        assert!(storage.load_bans().await.unwrap().is_empty());
        assert!(storage.load_tiers().await.unwrap().is_empty());
        assert!(storage.load_bonds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path());
        let player = PlayerId::generate();
        let now = Utc::now();

        let mut bans = BanDocument::new();
        bans.insert(
            player,
            BanEntry {
                player_id: player,
                display_name: "Alex".to_string(),
                tier: 2,
                start_time: now,
                end_time: now + Duration::minutes(60),
            },
        );
        storage.store(&DocumentSnapshot::Bans(bans.clone())).await.unwrap();

        assert!(storage.path_for(DocumentKind::Bans).exists());
        assert!(!dir.path().join("bans.json.tmp").exists());
        assert_eq!(storage.load_bans().await.unwrap(), bans);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path());
        std::fs::write(storage.path_for(DocumentKind::Tiers), b"{not json").unwrap();

        let result = storage.load_tiers().await;
        assert!(matches!(result, Err(EngineError::Serialization(_))));
    }
}
