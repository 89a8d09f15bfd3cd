//! Mercy decay - active play since the last death earns tiers back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use soulbond_types::{ActivitySample, Notice, PlayerId, Position};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::MercyConfig;
use crate::ledger::BanLedger;
use crate::world::World;

/// Per-player mercy baselines.
#[derive(Debug, Clone, PartialEq)]
pub struct MercyRecord {
    /// Last death, or last mercy granted.
    pub last_death: DateTime<Utc>,
    /// Host non-idle tick counter at `last_death`.
    pub ticks_baseline: u64,
    /// Position at the start of the current check window.
    pub window_position: Position,
    /// Interaction counter at the start of the current check window.
    pub window_interactions: u64,
}

impl MercyRecord {
    fn starting_at(now: DateTime<Utc>, sample: &ActivitySample) -> Self {
        Self {
            last_death: now,
            ticks_baseline: sample.non_idle_ticks,
            window_position: sample.position,
            window_interactions: sample.interactions,
        }
    }
}

/// Tracks progress toward the next tier decrement.
pub struct MercyTracker {
    records: DashMap<PlayerId, MercyRecord>,
    clock: Arc<dyn Clock>,
}

impl MercyTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }

    /// Restart the player's progress from now.
    pub fn record_death(&self, world: &dyn World, player: PlayerId) {
        let sample = world.activity(&player).unwrap_or_default();
        self.records
            .insert(player, MercyRecord::starting_at(self.clock.now(), &sample));
    }

    pub fn record(&self, player: &PlayerId) -> Option<MercyRecord> {
        self.records.get(player).map(|r| r.clone())
    }

    /// One scheduler pass. Returns `(player, new_tier)` for each decrement.
    ///
    /// The activity window restarts every pass whether or not the player
    /// qualified; accumulated ticks only restart when a tier is granted.
    pub fn run_cycle(
        &self,
        world: &dyn World,
        ledger: &BanLedger,
        config: &MercyConfig,
    ) -> Vec<(PlayerId, u32)> {
        let now = self.clock.now();
        let required = config.required_ticks();
        let mut granted = Vec::new();

        for player in world.online_players() {
            if ledger.tier_of(&player) == 0 {
                self.records.remove(&player);
                continue;
            }
            let Some(sample) = world.activity(&player) else {
                continue;
            };

            let mut record = match self.records.entry(player) {
                Entry::Occupied(entry) => entry.into_ref(),
                Entry::Vacant(entry) => {
                    entry.insert(MercyRecord::starting_at(now, &sample));
                    continue;
                }
            };

            let moved = record.window_position.distance(&sample.position);
            let interacted = sample.interactions.saturating_sub(record.window_interactions);
            let active = moved >= config.min_movement || interacted >= config.min_interactions;
            let accumulated = sample.non_idle_ticks.saturating_sub(record.ticks_baseline);

            record.window_position = sample.position;
            record.window_interactions = sample.interactions;

            debug!(
                player_id = %player,
                accumulated,
                required,
                active,
                "Mercy check"
            );
            if !active || accumulated < required {
                continue;
            }

            record.last_death = now;
            record.ticks_baseline = sample.non_idle_ticks;
            drop(record);

            let tier = ledger.decrement_tier(player);
            info!(player_id = %player, tier, "Mercy granted");
            world.send(&player, &Notice::MercyGranted { tier });
            granted.push((player, tier));
        }
        granted
    }
}
