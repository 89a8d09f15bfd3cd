//! Event and outcome types
//!
//! The host translates its own callbacks into [`EngineEvent`]s. Every engine
//! entry point answers with an [`EventOutcome`]: whether the triggering event
//! may proceed, plus a record of what the engine did in response.

use serde::{Deserialize, Serialize};

use crate::{BanEntry, DamageCause, PlayerId};

/// Lifecycle events delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Player is connecting
    Join { player: PlayerId, name: String },

    /// Player left
    Disconnect { player: PlayerId },

    /// Damage is about to be applied (cancellable)
    Damage {
        player: PlayerId,
        amount: f32,
        cause: DamageCause,
    },

    /// Player died
    Death { player: PlayerId, cause: DamageCause },

    /// One scheduling tick elapsed
    Tick,
}

/// Whether the triggering event may proceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Allow,
    Cancel,
}

/// Verdict on a join attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinDecision {
    Allowed,
    /// The player is banned; the host should refuse the connection
    Denied { ban: BanEntry, message: String },
}

impl JoinDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, JoinDecision::Allowed)
    }
}

/// Something the engine did while handling an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    BanCreated { player: PlayerId, tier: u32, minutes: u32 },
    BanLifted { player: PlayerId, tier: u32 },
    ChargeConsumed { player: PlayerId },
    Revived { player: PlayerId },
    ForcedDeath { player: PlayerId, source: PlayerId },
    DamageShared { target: PlayerId, amount: f32 },
    HungerShared { target: PlayerId, delta: i32 },
    LinkFormed { a: PlayerId, b: PlayerId },
    LinkBroken { a: PlayerId, b: PlayerId },
    TierDecayed { player: PlayerId, tier: u32 },
    Returned { player: PlayerId },
}

/// Result of handling one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub verdict: Verdict,
    pub effects: Vec<Effect>,
}

impl EventOutcome {
    pub fn allow() -> Self {
        Self {
            verdict: Verdict::Allow,
            effects: Vec::new(),
        }
    }

    pub fn cancel() -> Self {
        Self {
            verdict: Verdict::Cancel,
            effects: Vec::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.verdict == Verdict::Cancel
    }

    pub fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    pub fn extend(&mut self, effects: impl IntoIterator<Item = Effect>) {
        self.effects.extend(effects);
    }

    /// Keep this verdict and append the other outcome's effects.
    pub fn absorb(&mut self, other: EventOutcome) {
        self.effects.extend(other.effects);
    }
}
