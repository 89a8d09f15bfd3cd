//! Damage causes
//!
//! The engine tags the damage it deals itself so that, when the host feeds
//! that damage back as a new event, it is recognised and not propagated again.

use serde::{Deserialize, Serialize};

use crate::PlayerId;

/// Why a player is taking damage or died
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DamageCause {
    /// Mobs, falls, lava and everything else the world does
    Environment,

    /// Another player attacked
    Player { attacker: PlayerId },

    /// Mirrored from a bonded or pooled player
    Shared { source: PlayerId },

    /// Forced kill following another player's death
    DeathPact { source: PlayerId },
}

impl DamageCause {
    /// Whether the death counts as player-versus-player for ban duration.
    pub fn is_pvp(&self) -> bool {
        matches!(self, DamageCause::Player { .. })
    }

    pub fn is_death_pact(&self) -> bool {
        matches!(self, DamageCause::DeathPact { .. })
    }

    /// Player whose own event caused this one, if any.
    pub fn source(&self) -> Option<PlayerId> {
        match self {
            DamageCause::Shared { source } | DamageCause::DeathPact { source } => Some(*source),
            DamageCause::Player { attacker } => Some(*attacker),
            DamageCause::Environment => None,
        }
    }
}
