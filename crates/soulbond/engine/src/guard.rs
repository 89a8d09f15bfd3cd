//! Re-entry guard for propagated damage.
//!
//! Shared damage and death-pact kills are delivered through the world,
//! which dispatches them straight back into the engine. A player holds a
//! token while damage originating from or landing on them is in flight;
//! a second attempt to enter for the same player is refused, which is what
//! stops A -> B -> A loops.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use soulbond_types::PlayerId;

/// Set of players currently inside a propagation.
#[derive(Debug, Default, Clone)]
pub struct RecursionGuard {
    active: Arc<DashMap<PlayerId, ()>>,
}

/// Held while a player is inside a propagation; releases on drop.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct GuardToken {
    player: PlayerId,
    active: Arc<DashMap<PlayerId, ()>>,
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the player as in flight, or `None` if they already are.
    pub fn enter(&self, player: PlayerId) -> Option<GuardToken> {
        match self.active.entry(player) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(GuardToken {
                    player,
                    active: Arc::clone(&self.active),
                })
            }
        }
    }

    pub fn contains(&self, player: &PlayerId) -> bool {
        self.active.contains_key(player)
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl GuardToken {
    pub fn player(&self) -> PlayerId {
        self.player
    }
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.active.remove(&self.player);
    }
}
