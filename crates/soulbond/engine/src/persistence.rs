//! Persistence documents and the background writer.
//!
//! Engine calls happen on the event path and must not block on disk, so
//! mutations hand a full snapshot to [`PersistenceHandle::submit_with`] and a
//! single writer task stores them. Snapshots of the same document that pile
//! up while a write is in flight are coalesced to the latest one.
//!
//! Every snapshot is taken and stamped under one lock shared by all clones
//! of a handle, so sequence order is state order. The writer never stores a
//! snapshot older than one it already stored for the same document.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use soulbond_types::{BanEntry, PlayerId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::storage::StateStorage;

/// Active bans keyed by player.
pub type BanDocument = BTreeMap<PlayerId, BanEntry>;

/// Ban tiers keyed by player.
pub type TierDocument = BTreeMap<PlayerId, u32>;

/// Bond edges, stored in both directions.
pub type BondDocument = BTreeMap<PlayerId, PlayerId>;

/// Which persisted document a snapshot replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Bans,
    Tiers,
    Bonds,
}

/// A full copy of one document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSnapshot {
    Bans(BanDocument),
    Tiers(TierDocument),
    Bonds(BondDocument),
}

impl DocumentSnapshot {
    pub fn kind(&self) -> DocumentKind {
        match self {
            DocumentSnapshot::Bans(_) => DocumentKind::Bans,
            DocumentSnapshot::Tiers(_) => DocumentKind::Tiers,
            DocumentSnapshot::Bonds(_) => DocumentKind::Bonds,
        }
    }
}

/// A snapshot with its position in submission order.
#[derive(Debug)]
struct Stamped {
    seq: u64,
    snapshot: DocumentSnapshot,
}

/// Sending side of the persistence channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<Stamped>,
    /// Last sequence number handed out.
    seq: Arc<Mutex<u64>>,
}

impl PersistenceHandle {
    /// Take a snapshot with `take` and queue it. Never blocks on storage.
    ///
    /// `take` runs under the handle's lock, so two concurrent callers queue
    /// their snapshots in the order they were taken.
    pub fn submit_with(&self, take: impl FnOnce() -> DocumentSnapshot) {
        let mut seq = self.seq.lock();
        let snapshot = take();
        *seq += 1;
        let kind = snapshot.kind();
        let stamped = Stamped {
            seq: *seq,
            snapshot,
        };
        if self.tx.send(stamped).is_err() {
            warn!(?kind, "Persistence writer stopped; snapshot dropped");
        }
    }

    /// Queue an already taken snapshot.
    pub fn submit(&self, snapshot: DocumentSnapshot) {
        self.submit_with(|| snapshot);
    }
}

/// Receiving side; drive it with [`PersistenceWriter::run`].
pub struct PersistenceWriter {
    rx: mpsc::UnboundedReceiver<Stamped>,
    storage: Arc<dyn StateStorage>,
    /// Highest sequence stored per document slot.
    stored: [u64; 3],
}

/// Create a connected handle and writer for `storage`.
pub fn persistence_channel(storage: Arc<dyn StateStorage>) -> (PersistenceHandle, PersistenceWriter) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        PersistenceHandle {
            tx,
            seq: Arc::new(Mutex::new(0)),
        },
        PersistenceWriter {
            rx,
            storage,
            stored: [0; 3],
        },
    )
}

impl PersistenceWriter {
    /// Store snapshots until every handle is dropped.
    ///
    /// Storage failures are logged and the writer keeps going; the next
    /// snapshot of the same document carries the full state again.
    pub async fn run(mut self) {
        while let Some(first) = self.rx.recv().await {
            let mut latest: BTreeMap<usize, Stamped> = BTreeMap::new();
            Self::keep_newest(&mut latest, first);
            while let Ok(next) = self.rx.try_recv() {
                Self::keep_newest(&mut latest, next);
            }

            for (slot, stamped) in latest {
                let kind = stamped.snapshot.kind();
                if stamped.seq <= self.stored[slot] {
                    debug!(?kind, seq = stamped.seq, "Stale snapshot skipped");
                    continue;
                }
                match self.storage.store(&stamped.snapshot).await {
                    Ok(()) => {
                        self.stored[slot] = stamped.seq;
                        debug!(?kind, seq = stamped.seq, "Document persisted");
                    }
                    Err(e) => warn!(?kind, error = %e, "Failed to persist document"),
                }
            }
        }
        debug!("Persistence writer finished");
    }

    fn keep_newest(latest: &mut BTreeMap<usize, Stamped>, stamped: Stamped) {
        let slot = Self::slot(stamped.snapshot.kind());
        match latest.get(&slot) {
            Some(held) if held.seq > stamped.seq => {}
            _ => {
                latest.insert(slot, stamped);
            }
        }
    }

    fn slot(kind: DocumentKind) -> usize {
        match kind {
            DocumentKind::Bans => 0,
            DocumentKind::Tiers => 1,
            DocumentKind::Bonds => 2,
        }
    }
}
